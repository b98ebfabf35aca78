//! 近傍候補の検索
//!
//! 基準点と半径から `wikibase:around` を1回発行し、結果を距離順に並べる。
//! 入力検証はI/Oの前に行う。

use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use keharita_common::{rank_from, AroundQuery, CandidateEntity, CategoryFilter, Coordinate};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CandidateFinder {
    kb: Arc<dyn KnowledgeBase>,
    languages: String,
    enrich_categories: bool,
}

impl CandidateFinder {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            kb,
            languages: keharita_common::sparql::DEFAULT_LANGUAGES.to_string(),
            enrich_categories: false,
        }
    }

    pub fn with_languages(mut self, languages: &str) -> Self {
        self.languages = languages.to_string();
        self
    }

    /// 候補ごとにP31ラベルを取得する
    pub fn with_category_enrichment(mut self, enabled: bool) -> Self {
        self.enrich_categories = enabled;
        self
    }

    /// 検索クエリを組み立てる（入力不正はここで弾く）
    pub fn build_query(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: CategoryFilter,
    ) -> Result<AroundQuery> {
        Ok(AroundQuery::new(center, radius_m, filter)?.with_languages(&self.languages))
    }

    /// 近傍候補を距離の昇順で返す
    ///
    /// 0件は正常（空リスト）。通信エラーは `Unavailable` で再試行しない。
    pub async fn find(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: CategoryFilter,
    ) -> Result<Vec<CandidateEntity>> {
        let query = self.build_query(center, radius_m, filter)?;
        self.run(&query).await
    }

    pub async fn run(&self, query: &AroundQuery) -> Result<Vec<CandidateEntity>> {
        let mut candidates = self.kb.around(query).await?;

        if self.enrich_categories {
            for candidate in candidates.iter_mut() {
                match self.kb.instance_label(&candidate.qid).await {
                    Ok(label) => candidate.category = label,
                    Err(e) => debug!(qid = %candidate.qid, error = %e, "P31 label unavailable"),
                }
            }
        }

        Ok(rank_from(&query.center, candidates))
    }
}
