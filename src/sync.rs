//! リモート購読 → SnapshotUpdate
//!
//! newItems / matches を購読し、通知を1本のチャネルにまとめる。
//! 状態の再計算は受け取り側（Session）で行う。

use crate::error::Result;
use crate::store::{RemoteStore, StoreEvent};
use keharita_common::{Collection, SnapshotUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Update(SnapshotUpdate),
    /// 購読の失敗（直前の状態は維持される）
    Failed { collection: Collection, message: String },
}

/// 購読タスク群
pub struct SyncListener {
    receiver: mpsc::Receiver<SyncEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncListener {
    /// 両コレクションの購読を開始
    pub async fn start(store: Arc<dyn RemoteStore>) -> Result<Self> {
        let (tx, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(Collection::ALL.len());

        for collection in Collection::ALL {
            let mut events = match store.subscribe(collection.path()).await {
                Ok(events) => events,
                Err(e) => {
                    // 片方の購読失敗で他方は止めない
                    warn!(collection = collection.path(), error = %e, "subscribe failed, keeping last known state");
                    let _ = tx
                        .send(SyncEvent::Failed {
                            collection,
                            message: e.to_string(),
                        })
                        .await;
                    continue;
                }
            };
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let forwarded = match event {
                        StoreEvent::Snapshot(records) => {
                            let update = SnapshotUpdate::from_records(collection, &records);
                            debug!(collection = collection.path(), count = update.ids.len(), "snapshot received");
                            SyncEvent::Update(update)
                        }
                        StoreEvent::Failed(message) => {
                            warn!(collection = collection.path(), error = %message, "subscription failed");
                            SyncEvent::Failed { collection, message }
                        }
                    };
                    if tx.send(forwarded).await.is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(Self { receiver, tasks })
    }

    /// 次のイベント（購読が全て終わると None）
    pub async fn next(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for SyncListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
