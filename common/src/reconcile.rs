//! 状態照合（リモート記録 → ローカル状態）
//!
//! ローカルの `status` はリモートの2コレクション（newItems / matches）の
//! 実体化ビューにすぎない。通知ごとにIDセットを置き換え、全地点の状態を
//! 純関数で再計算する。

use crate::catalog::Catalog;
use crate::types::{CatalogPoint, PointStatus};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// リモートストアのコレクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    NewItems,
    Matches,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::NewItems, Collection::Matches];

    /// ストア上のパス
    pub fn path(&self) -> &'static str {
        match self {
            Collection::NewItems => "newItems",
            Collection::Matches => "matches",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_matches('/') {
            "newItems" => Some(Collection::NewItems),
            "matches" => Some(Collection::Matches),
            _ => None,
        }
    }
}

/// 1コレクション分の更新通知
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub collection: Collection,
    pub ids: HashSet<u64>,
}

impl SnapshotUpdate {
    /// コレクションの生データ（キー=KE ID）から生成
    pub fn from_records(collection: Collection, records: &Map<String, Value>) -> Self {
        Self {
            collection,
            ids: collect_ids(collection, records),
        }
    }
}

/// キーからKE IDを取り出す（数値でないキーは警告してスキップ）
pub fn collect_ids(collection: Collection, records: &Map<String, Value>) -> HashSet<u64> {
    records
        .iter()
        .filter(|(_, v)| !v.is_null())
        .filter_map(|(key, _)| match key.trim().parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(collection = collection.path(), key = %key, "数値でないキーをスキップ");
                None
            }
        })
        .collect()
}

/// 2コレクションの最新IDセット
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub new_item_ids: HashSet<u64>,
    pub matched_ids: HashSet<u64>,
}

impl RemoteSnapshot {
    /// 通知を適用（該当コレクションを丸ごと置換）
    pub fn apply(&mut self, update: SnapshotUpdate) {
        match update.collection {
            Collection::NewItems => self.new_item_ids = update.ids,
            Collection::Matches => self.matched_ids = update.ids,
        }
    }

    /// 楽観的更新: 1件追加
    pub fn insert(&mut self, collection: Collection, id: u64) {
        match collection {
            Collection::NewItems => self.new_item_ids.insert(id),
            Collection::Matches => self.matched_ids.insert(id),
        };
    }

    /// IDの状態（新規報告が照合より優先）
    pub fn status_of(&self, id: u64) -> PointStatus {
        if self.new_item_ids.contains(&id) {
            PointStatus::ReportedNew
        } else if self.matched_ids.contains(&id) {
            PointStatus::Matched
        } else {
            PointStatus::Unmatched
        }
    }
}

/// 状態ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub matched: usize,
    pub reported_new: usize,
    pub unmatched: usize,
}

impl StatusCounts {
    pub fn of(points: &[CatalogPoint]) -> Self {
        let mut counts = StatusCounts {
            total: points.len(),
            ..Default::default()
        };
        for p in points {
            match p.status {
                PointStatus::Unmatched => counts.unmatched += 1,
                PointStatus::Matched => counts.matched += 1,
                PointStatus::ReportedNew => counts.reported_new += 1,
            }
        }
        counts
    }
}

/// 再計算結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// 今回 ReportedNew になった地点
    pub newly_reported: Vec<u64>,
    /// 今回 Matched になった地点
    pub newly_matched: Vec<u64>,
    /// 状態が変化した地点数
    pub changed: usize,
    pub counts: StatusCounts,
}

/// 全地点の状態をスナップショットから再計算
///
/// O(n)。同じスナップショットを2回適用しても結果は変わらない。
pub fn reconcile(points: &mut [CatalogPoint], snapshot: &RemoteSnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for point in points.iter_mut() {
        let next = snapshot.status_of(point.id);
        if next == point.status {
            continue;
        }
        match next {
            PointStatus::ReportedNew => report.newly_reported.push(point.id),
            PointStatus::Matched => report.newly_matched.push(point.id),
            PointStatus::Unmatched => {}
        }
        point.status = next;
        report.changed += 1;
    }

    report.counts = StatusCounts::of(points);
    report
}

/// カタログ全体に適用
pub fn reconcile_catalog(catalog: &mut Catalog, snapshot: &RemoteSnapshot) -> ReconcileReport {
    reconcile(catalog.points_mut(), snapshot)
}
