//! 照合セッション
//!
//! カタログ・リモートの最新IDセット・候補パネルを1か所に持つ。
//! 状態の変更は全てこのコントローラを経由する。
//!
//! - 同期: `apply_update` でIDセットを置き換えて再計算
//! - 候補検索: 世代番号付きのチケットで、古い結果を捨てる
//! - 判定: 判定記録 → ユーザー集計の順に書き込む

use crate::error::{KeHaritaError, Result};
use crate::finder::CandidateFinder;
use crate::store::{fetch_collection, RemoteStore, USERS};
use crate::sync::SyncEvent;
use keharita_common::{
    nearest_unmatched, normalize_qid, reconcile_catalog, AroundQuery, CandidateEntity, Catalog,
    CategoryFilter, Collection, Coordinate, DecisionKind, MatchDecision, NewItemReport, NextPoint,
    ReconcileReport, RemoteSnapshot, SnapshotUpdate, StatusCounts, UserIdentity, UserStats,
};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// 現在時刻 (epoch ms)
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 候補検索の対象
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchTarget {
    /// KE地点（未紐付けの項目のみ）
    Point(u64),
    /// 任意の座標（紐付け済みも含む）
    Coordinate(Coordinate),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PanelState {
    #[default]
    Idle,
    Loading,
    Ready(Vec<CandidateEntity>),
    /// 通信失敗（リストは空にする）
    Unavailable(String),
}

/// 候補パネル
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidatePanel {
    pub target: Option<SearchTarget>,
    pub radius_m: f64,
    pub state: PanelState,
}

impl CandidatePanel {
    pub fn candidates(&self) -> &[CandidateEntity] {
        match &self.state {
            PanelState::Ready(list) => list,
            _ => &[],
        }
    }
}

/// 実行中の候補検索
pub struct SearchTicket {
    pub generation: u64,
    pub handle: JoinHandle<Result<Vec<CandidateEntity>>>,
}

impl SearchTicket {
    /// 結果を待つ（中断された場合は `Cancelled`）
    pub async fn wait(self) -> Result<Vec<CandidateEntity>> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(KeHaritaError::Cancelled),
            Err(e) => Err(KeHaritaError::Unavailable(format!("検索タスクが異常終了しました: {}", e))),
        }
    }
}

/// 判定の結果
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub ke_id: u64,
    /// ユーザー集計の更新に成功したか（失敗しても判定は保存済み）
    pub counter_updated: bool,
    /// 判定した地点から最寄りの未照合地点
    pub next: NextPoint,
}

pub struct Session {
    catalog: Catalog,
    snapshot: RemoteSnapshot,
    identity: Option<UserIdentity>,
    radius_m: f64,
    store: Arc<dyn RemoteStore>,
    finder: CandidateFinder,
    panel: CandidatePanel,
    generation: u64,
    in_flight: Option<AbortHandle>,
}

impl Session {
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn RemoteStore>,
        finder: CandidateFinder,
        radius_m: f64,
    ) -> Result<Self> {
        validate_radius(radius_m)?;
        Ok(Self {
            catalog,
            snapshot: RemoteSnapshot::default(),
            identity: None,
            radius_m,
            store,
            finder,
            panel: CandidatePanel {
                radius_m,
                ..Default::default()
            },
            generation: 0,
            in_flight: None,
        })
    }

    pub fn with_identity(mut self, identity: Option<UserIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn snapshot(&self) -> &RemoteSnapshot {
        &self.snapshot
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: UserIdentity) {
        info!(user = %identity.name, user_id = %identity.user_id, "identity set");
        self.identity = Some(identity);
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub fn set_radius(&mut self, radius_m: f64) -> Result<()> {
        validate_radius(radius_m)?;
        self.radius_m = radius_m;
        Ok(())
    }

    pub fn panel(&self) -> &CandidatePanel {
        &self.panel
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::of(self.catalog.points())
    }

    // ------------------------------------------------------------------
    // 同期
    // ------------------------------------------------------------------

    /// 1コレクション分の通知を適用して全地点を再計算
    pub fn apply_update(&mut self, update: SnapshotUpdate) -> ReconcileReport {
        let collection = update.collection;
        self.snapshot.apply(update);
        let report = reconcile_catalog(&mut self.catalog, &self.snapshot);
        debug!(
            collection = collection.path(),
            changed = report.changed,
            unmatched = report.counts.unmatched,
            "reconciled"
        );
        report
    }

    /// 購読イベントを処理（失敗時は直前の状態を維持）
    pub fn apply_sync_event(&mut self, event: SyncEvent) -> Option<ReconcileReport> {
        match event {
            SyncEvent::Update(update) => Some(self.apply_update(update)),
            SyncEvent::Failed { collection, message } => {
                warn!(collection = collection.path(), error = %message, "keeping last known state");
                None
            }
        }
    }

    /// 両コレクションを1回取得して再計算（購読しない一回限りのコマンド用）
    pub async fn refresh(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for collection in Collection::ALL {
            let records = fetch_collection(self.store.as_ref(), collection.path()).await?;
            let partial = self.apply_update(SnapshotUpdate::from_records(collection, &records));
            report.newly_reported.extend(partial.newly_reported);
            report.newly_matched.extend(partial.newly_matched);
            report.changed += partial.changed;
            report.counts = partial.counts;
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // 候補検索
    // ------------------------------------------------------------------

    /// 検索を開始する
    ///
    /// 入力の検証はI/Oの前に行う。実行中の検索があれば中断し、
    /// 世代番号を進める。
    pub fn begin_search(&mut self, target: SearchTarget) -> Result<SearchTicket> {
        let (center, filter) = match target {
            SearchTarget::Point(id) => {
                let point = self.catalog.get(id).ok_or(KeHaritaError::UnknownPoint(id))?;
                (point.coordinate, CategoryFilter::for_point_review())
            }
            SearchTarget::Coordinate(c) => (c, CategoryFilter::for_coordinate_search()),
        };
        let query: AroundQuery = self.finder.build_query(center, self.radius_m, filter)?;

        if let Some(previous) = self.in_flight.take() {
            debug!(generation = self.generation, "aborting previous search");
            previous.abort();
        }

        self.generation += 1;
        self.panel = CandidatePanel {
            target: Some(target),
            radius_m: self.radius_m,
            state: PanelState::Loading,
        };

        let finder = self.finder.clone();
        let handle = tokio::spawn(async move { finder.run(&query).await });
        self.in_flight = Some(handle.abort_handle());

        Ok(SearchTicket {
            generation: self.generation,
            handle,
        })
    }

    /// 検索結果をパネルに反映
    ///
    /// 現在の世代でなければ捨てて `false` を返す。
    pub fn complete_search(&mut self, generation: u64, result: Result<Vec<CandidateEntity>>) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "stale search result dropped");
            return false;
        }
        self.in_flight = None;

        match result {
            Ok(candidates) => {
                info!(count = candidates.len(), radius_m = self.panel.radius_m, "candidates ready");
                self.panel.state = PanelState::Ready(candidates);
                true
            }
            Err(KeHaritaError::Cancelled) => false,
            Err(e) => {
                warn!(error = %e, "candidate search failed");
                self.panel.state = PanelState::Unavailable(e.to_string());
                true
            }
        }
    }

    /// 検索して結果を待つ
    pub async fn search(&mut self, target: SearchTarget) -> Result<&CandidatePanel> {
        let ticket = self.begin_search(target)?;
        let generation = ticket.generation;
        let result = ticket.wait().await;
        self.complete_search(generation, result);
        Ok(&self.panel)
    }

    // ------------------------------------------------------------------
    // 判定
    // ------------------------------------------------------------------

    /// KE地点をQIDに紐付ける
    pub async fn record_match(&mut self, ke_id: u64, qid: &str) -> Result<DecisionOutcome> {
        let identity = self.require_identity()?;
        let point = self
            .catalog
            .get(ke_id)
            .ok_or(KeHaritaError::UnknownPoint(ke_id))?
            .clone();
        let qid = normalize_qid(qid)?;
        let timestamp = now_ms();

        let record = MatchDecision {
            ke_id,
            qid: qid.clone(),
            timestamp,
            user_name: identity.name.clone(),
            user_id: identity.user_id.clone(),
            name: point.name.clone(),
        };
        self.persist(Collection::Matches, ke_id, serde_json::to_value(&record)?)
            .await?;
        info!(ke_id, qid = %qid, user = %identity.name, "match recorded");

        let counter_updated = self
            .bump_user_stats(&identity, DecisionKind::Match, timestamp)
            .await;
        Ok(self.outcome(ke_id, &point.coordinate, counter_updated))
    }

    /// KE地点を新規項目として報告する
    pub async fn report_new_item(&mut self, ke_id: u64) -> Result<DecisionOutcome> {
        let identity = self.require_identity()?;
        let point = self
            .catalog
            .get(ke_id)
            .ok_or(KeHaritaError::UnknownPoint(ke_id))?
            .clone();
        let timestamp = now_ms();

        let record = NewItemReport {
            ke_id,
            timestamp,
            user_name: identity.name.clone(),
            user_id: identity.user_id.clone(),
            name: point.name.clone(),
            city: point.city.clone(),
            district: point.district.clone(),
        };
        self.persist(Collection::NewItems, ke_id, serde_json::to_value(&record)?)
            .await?;
        info!(ke_id, user = %identity.name, "new item reported");

        let counter_updated = self
            .bump_user_stats(&identity, DecisionKind::NewItem, timestamp)
            .await;
        Ok(self.outcome(ke_id, &point.coordinate, counter_updated))
    }

    /// 指定座標から最寄りの未照合地点
    pub fn next_unmatched(&self, from: &Coordinate) -> NextPoint {
        nearest_unmatched(self.catalog.iter(), from)
    }

    fn require_identity(&self) -> Result<UserIdentity> {
        self.identity.clone().ok_or(KeHaritaError::IdentityRequired)
    }

    /// 判定記録を書き込み、ローカルにも即時反映する
    ///
    /// 同じキーへの書き込みは後勝ち。
    async fn persist(&mut self, collection: Collection, ke_id: u64, value: serde_json::Value) -> Result<()> {
        let path = format!("{}/{}", collection.path(), ke_id);
        self.store.set(&path, value).await?;

        self.snapshot.insert(collection, ke_id);
        reconcile_catalog(&mut self.catalog, &self.snapshot);
        Ok(())
    }

    /// ユーザー集計の読み込み→加算→書き込み
    ///
    /// 失敗しても判定記録は残すので、結果は bool で返す。
    async fn bump_user_stats(&self, identity: &UserIdentity, kind: DecisionKind, timestamp: i64) -> bool {
        let path = format!("{}/{}", USERS, identity.user_id);

        let mut stats = match self.store.get(&path).await {
            Ok(Some(value)) => serde_json::from_value::<UserStats>(value).unwrap_or_else(|e| {
                warn!(path = %path, error = %e, "user stats unreadable, starting fresh");
                UserStats::new(identity.name.clone())
            }),
            Ok(None) => UserStats::new(identity.name.clone()),
            Err(e) => {
                warn!(path = %path, error = %e, "failed to read user stats");
                return false;
            }
        };
        stats.name = identity.name.clone();
        stats.record(kind, timestamp);

        let value = match serde_json::to_value(&stats) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to encode user stats");
                return false;
            }
        };
        match self.store.set(&path, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to update user stats");
                false
            }
        }
    }

    fn outcome(&self, ke_id: u64, from: &Coordinate, counter_updated: bool) -> DecisionOutcome {
        DecisionOutcome {
            ke_id,
            counter_updated,
            next: self.next_unmatched(from),
        }
    }
}

fn validate_radius(radius_m: f64) -> Result<()> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(KeHaritaError::InvalidInput(format!(
            "検索半径は正の値である必要があります: {}",
            radius_m
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use keharita_common::{CatalogPoint, EntityMetadata, PointStatus, SearchHit};
    use std::collections::HashSet;

    struct NoKnowledge;

    #[async_trait]
    impl KnowledgeBase for NoKnowledge {
        async fn around(&self, _query: &AroundQuery) -> Result<Vec<CandidateEntity>> {
            Ok(Vec::new())
        }
        async fn instance_label(&self, _qid: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn entity_metadata(&self, _qid: &str) -> Result<Option<EntityMetadata>> {
            Ok(None)
        }
        async fn search(&self, _text: &str) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn session() -> Session {
        let points = vec![
            CatalogPoint::new(1, "A", Coordinate::new(41.0, 29.0).unwrap()),
            CatalogPoint::new(2, "B", Coordinate::new(41.01, 29.0).unwrap()),
        ];
        let finder = CandidateFinder::new(Arc::new(NoKnowledge));
        Session::new(Catalog::new(points), Arc::new(MemoryStore::new()), finder, 100.0).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_radius() {
        let finder = CandidateFinder::new(Arc::new(NoKnowledge));
        let result = Session::new(Catalog::new(Vec::new()), Arc::new(MemoryStore::new()), finder, 0.0);
        assert!(matches!(result, Err(KeHaritaError::InvalidInput(_))));
    }

    #[test]
    fn test_apply_update_and_failure_keeps_state() {
        let mut s = session();
        let ids: HashSet<u64> = [2].into_iter().collect();
        s.apply_update(SnapshotUpdate { collection: Collection::Matches, ids });
        assert_eq!(s.catalog().get(2).unwrap().status, PointStatus::Matched);

        let report = s.apply_sync_event(SyncEvent::Failed {
            collection: Collection::Matches,
            message: "offline".into(),
        });
        assert!(report.is_none());
        assert_eq!(s.catalog().get(2).unwrap().status, PointStatus::Matched);
        assert_eq!(s.counts().matched, 1);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut s = session();
        s.generation = 3;
        assert!(!s.complete_search(2, Ok(Vec::new())));
        assert_eq!(s.panel().state, PanelState::Idle);
        assert!(s.complete_search(3, Ok(Vec::new())));
        assert_eq!(s.panel().state, PanelState::Ready(Vec::new()));
    }

    #[tokio::test]
    async fn test_unknown_point_search_rejected() {
        let mut s = session();
        let err = s.begin_search(SearchTarget::Point(99)).err().unwrap();
        assert!(matches!(err, KeHaritaError::UnknownPoint(99)));
        assert_eq!(s.generation(), 0);
    }

    #[tokio::test]
    async fn test_match_without_identity_writes_nothing() {
        let mut s = session();
        let err = s.record_match(1, "Q42").await.unwrap_err();
        assert!(matches!(err, KeHaritaError::IdentityRequired));
        assert_eq!(s.catalog().get(1).unwrap().status, PointStatus::Unmatched);
    }

    #[tokio::test]
    async fn test_match_moves_to_next_unmatched() {
        let mut s = session().with_identity(UserIdentity::from_name("Test", 1_000_000));
        let outcome = s.record_match(1, "q42").await.unwrap();
        assert!(outcome.counter_updated);
        assert_eq!(outcome.next.point().map(|p| p.id), Some(2));
        assert_eq!(s.catalog().get(1).unwrap().status, PointStatus::Matched);

        let outcome = s.report_new_item(2).await.unwrap();
        assert_eq!(outcome.next, NextPoint::AllResolved);
    }
}
