//! プロセス内ストア（テスト・オフライン用）

use super::{collection_map, set_at, split_path, value_at, RemoteStore, StoreEvent};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// JSONツリーをメモリ上に持つストア
///
/// 書き込みのたびに変更のあったトップレベルのコレクション名を通知する。
#[derive(Clone)]
pub struct MemoryStore {
    root: Arc<Mutex<Value>>,
    changes: broadcast::Sender<String>,
    writes: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_data(Value::Object(Map::new()))
    }

    /// 初期データ付きで生成
    pub fn with_data(root: Value) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            root: Arc::new(Mutex::new(root)),
            changes,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// これまでの書き込み回数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// ツリー全体のコピー
    pub async fn dump(&self) -> Value {
        self.root.lock().await.clone()
    }

    async fn snapshot_of(&self, collection: &str) -> Map<String, Value> {
        let root = self.root.lock().await;
        collection_map(value_at(&root, &[collection]))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        let root = self.root.lock().await;
        Ok(value_at(&root, &segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        {
            let mut root = self.root.lock().await;
            set_at(&mut root, &segments, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path, "memory store write");

        // 購読者がいなくてもエラーにしない
        let _ = self.changes.send(segments[0].to_string());
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<mpsc::Receiver<StoreEvent>> {
        let segments = split_path(collection)?;
        let collection = segments[0].to_string();

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut changes = self.changes.subscribe();
        let initial = self.snapshot_of(&collection).await;
        let store = self.clone();

        tokio::spawn(async move {
            if tx.send(StoreEvent::Snapshot(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == collection => {
                        let snapshot = store.snapshot_of(&collection).await;
                        if tx.send(StoreEvent::Snapshot(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    // 取りこぼしても最新値を送れば追いつく
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let snapshot = store.snapshot_of(&collection).await;
                        if tx.send(StoreEvent::Snapshot(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
