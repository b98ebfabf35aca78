//! 外部ナレッジベース（Wikidata）

mod wikidata;

pub use wikidata::WikidataClient;

use crate::error::Result;
use async_trait::async_trait;
use keharita_common::{AroundQuery, CandidateEntity, EntityMetadata, SearchHit};

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// 半径検索（距離は未計算、クエリ順のまま）
    async fn around(&self, query: &AroundQuery) -> Result<Vec<CandidateEntity>>;

    /// P31（instance of）のラベル
    async fn instance_label(&self, qid: &str) -> Result<Option<String>>;

    /// 表示用メタデータ（P131/P17はラベル解決済み）
    async fn entity_metadata(&self, qid: &str) -> Result<Option<EntityMetadata>>;

    /// テキスト検索
    async fn search(&self, text: &str) -> Result<Vec<SearchHit>>;
}
