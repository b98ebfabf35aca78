//! 候補検索テスト
//!
//! 近傍候補の並び順、0件、通信失敗、古い結果の破棄を検証

use async_trait::async_trait;
use keharita_common::{
    AroundQuery, CandidateEntity, Catalog, CatalogPoint, Coordinate, EntityMetadata, SearchHit,
};
use keharita_rust::error::{KeHaritaError, Result};
use keharita_rust::finder::CandidateFinder;
use keharita_rust::knowledge::KnowledgeBase;
use keharita_rust::session::{PanelState, SearchTarget, Session};
use keharita_rust::store::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 緯度1度あたりのメートル（R=6371km）
const METERS_PER_DEGREE: f64 = 111_194.93;

fn center() -> Coordinate {
    Coordinate::new(41.0, 29.0).unwrap()
}

fn entity_north_of(qid: &str, meters: f64) -> CandidateEntity {
    CandidateEntity {
        qid: qid.into(),
        label: format!("{} label", qid),
        coordinate: Coordinate::new(41.0 + meters / METERS_PER_DEGREE, 29.0).unwrap(),
        distance_m: 0.0,
        category: None,
        catalog_ref: None,
    }
}

#[derive(Default)]
struct FakeKnowledge {
    entities: Vec<CandidateEntity>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

#[async_trait]
impl KnowledgeBase for FakeKnowledge {
    async fn around(&self, _query: &AroundQuery) -> Result<Vec<CandidateEntity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(KeHaritaError::Unavailable("SPARQL endpoint timed out".into()));
        }
        Ok(self.entities.clone())
    }

    async fn instance_label(&self, qid: &str) -> Result<Option<String>> {
        match qid {
            "Q30" => Ok(Some("çeşme".into())),
            "Q80" => Err(KeHaritaError::Unavailable("timeout".into())),
            _ => Ok(None),
        }
    }

    async fn entity_metadata(&self, _qid: &str) -> Result<Option<EntityMetadata>> {
        Ok(None)
    }

    async fn search(&self, _text: &str) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}

fn unordered_entities() -> Vec<CandidateEntity> {
    vec![
        entity_north_of("Q50", 50.0),
        entity_north_of("Q30", 30.0),
        entity_north_of("Q80", 80.0),
    ]
}

fn session(kb: Arc<FakeKnowledge>) -> Session {
    let catalog = Catalog::new(vec![CatalogPoint::new(1, "Sebil", center())]);
    let finder = CandidateFinder::new(kb).with_category_enrichment(true);
    Session::new(catalog, Arc::new(MemoryStore::new()), finder, 100.0).unwrap()
}

/// 距離の昇順で返す
#[tokio::test]
async fn test_candidates_ranked_by_distance() {
    let kb = Arc::new(FakeKnowledge {
        entities: unordered_entities(),
        ..Default::default()
    });
    let finder = CandidateFinder::new(kb);

    let ranked = finder
        .find(center(), 100.0, Default::default())
        .await
        .unwrap();

    let qids: Vec<&str> = ranked.iter().map(|c| c.qid.as_str()).collect();
    assert_eq!(qids, vec!["Q30", "Q50", "Q80"]);
    for (c, expected) in ranked.iter().zip([30.0, 50.0, 80.0]) {
        assert!((c.distance_m - expected).abs() < 0.5, "{} は {}m", c.qid, c.distance_m);
    }
}

/// カテゴリの取得失敗は候補を落とさない
#[tokio::test]
async fn test_category_enrichment_is_best_effort() {
    let kb = Arc::new(FakeKnowledge {
        entities: unordered_entities(),
        ..Default::default()
    });
    let mut s = session(kb);

    let panel = s.search(SearchTarget::Point(1)).await.unwrap();
    let list = panel.candidates();
    assert_eq!(list.len(), 3);
    assert_eq!(list[0].category.as_deref(), Some("çeşme"));
    assert_eq!(list[2].qid, "Q80");
    assert_eq!(list[2].category, None);
}

/// 0件は空のリスト
#[tokio::test]
async fn test_no_candidates_is_empty_list() {
    let kb = Arc::new(FakeKnowledge::default());
    let mut s = session(kb);

    let panel = s.search(SearchTarget::Coordinate(center())).await.unwrap();
    assert_eq!(panel.state, PanelState::Ready(Vec::new()));
    assert_eq!(panel.radius_m, 100.0);
}

/// 通信失敗でリストを空にしてエラー状態にする
#[tokio::test]
async fn test_transport_failure_clears_panel() {
    let kb = Arc::new(FakeKnowledge {
        entities: unordered_entities(),
        fail: true,
        ..Default::default()
    });
    let mut s = session(kb.clone());

    let panel = s.search(SearchTarget::Point(1)).await.unwrap();
    assert!(matches!(panel.state, PanelState::Unavailable(_)));
    assert!(panel.candidates().is_empty());
    // 自動再試行しない
    assert_eq!(kb.calls.load(Ordering::SeqCst), 1);
}

/// 半径が不正ならI/O前に弾く
#[tokio::test]
async fn test_invalid_radius_rejected_before_io() {
    let kb = Arc::new(FakeKnowledge::default());
    let finder = CandidateFinder::new(kb.clone());

    for radius in [0.0, -5.0, f64::NAN] {
        let err = finder
            .find(center(), radius, Default::default())
            .await
            .unwrap_err();
        assert!(err.is_malformed_input());
    }

    let mut s = session(kb.clone());
    assert!(s.set_radius(0.0).is_err());
    assert_eq!(s.radius_m(), 100.0);
    assert_eq!(kb.calls.load(Ordering::SeqCst), 0);
}

/// 新しい検索を始めると前の結果は捨てられる
#[tokio::test]
async fn test_stale_search_is_discarded() {
    let kb = Arc::new(FakeKnowledge {
        entities: unordered_entities(),
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let mut s = session(kb);

    let first = s.begin_search(SearchTarget::Point(1)).unwrap();
    let second = s.begin_search(SearchTarget::Coordinate(center())).unwrap();
    assert_eq!(second.generation, first.generation + 1);

    let first_generation = first.generation;
    let first_result = first.wait().await;
    assert!(matches!(first_result, Err(KeHaritaError::Cancelled)));
    assert!(!s.complete_search(first_generation, first_result));
    assert_eq!(s.panel().state, PanelState::Loading);

    // 遅れて届いた古い世代の成功結果も反映しない
    assert!(!s.complete_search(first_generation, Ok(Vec::new())));

    let second_generation = second.generation;
    let second_result = second.wait().await;
    assert!(s.complete_search(second_generation, second_result));
    assert_eq!(s.panel().candidates().len(), 3);
    assert_eq!(s.panel().target, Some(SearchTarget::Coordinate(center())));
}
