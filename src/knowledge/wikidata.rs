//! Wikidata クライアント
//!
//! - SPARQL: https://query.wikidata.org/sparql
//! - Action API: https://www.wikidata.org/w/api.php
//!   (`wbgetentities`, `wbsearchentities`)

use super::KnowledgeBase;
use crate::config::Config;
use crate::error::{KeHaritaError, Result};
use async_trait::async_trait;
use keharita_common::sparql::{
    instance_label_query, parse_around_response, parse_entity_response,
    parse_instance_label_response, parse_label_response, parse_search_response,
};
use keharita_common::{AroundQuery, CandidateEntity, EntityMetadata, SearchHit};
use reqwest::{header, Client};
use tracing::debug;

const USER_AGENT: &str = concat!("keharita-rust/", env!("CARGO_PKG_VERSION"));

/// 検索結果の上限
const SEARCH_LIMIT: u32 = 50;

pub struct WikidataClient {
    http_client: Client,
    sparql_endpoint: String,
    api_endpoint: String,
    languages: String,
}

impl WikidataClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/sparql-results+json, application/json"),
        );

        let http_client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| KeHaritaError::Config(format!("HTTPクライアントの作成に失敗: {}", e)))?;

        Ok(Self {
            http_client,
            sparql_endpoint: config.sparql_endpoint.clone(),
            api_endpoint: config.api_endpoint.clone(),
            languages: config.language.clone(),
        })
    }

    /// 最優先の言語（wbsearchentities 用）
    fn primary_language(&self) -> &str {
        self.languages
            .split(',')
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("en")
    }

    async fn sparql(&self, query: &str) -> Result<String> {
        debug!(chars = query.len(), "SPARQL query");
        let response = self
            .http_client
            .get(&self.sparql_endpoint)
            .query(&[("query", query), ("format", "json")])
            .send()
            .await?;
        Self::text_of(response, "SPARQL").await
    }

    async fn api(&self, params: &[(&str, &str)]) -> Result<String> {
        let response = self
            .http_client
            .get(&self.api_endpoint)
            .query(params)
            .query(&[("format", "json")])
            .send()
            .await?;
        Self::text_of(response, "Wikidata API").await
    }

    async fn text_of(response: reqwest::Response, what: &str) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeHaritaError::Unavailable(format!(
                "{} がエラーを返しました {}: {}",
                what, status, body
            )));
        }
        Ok(response.text().await?)
    }

    /// ラベルのみ取得（失敗時はQIDを返す）
    async fn label_or_id(&self, qid: &str) -> String {
        let languages = self.languages.replace(',', "|");
        let result = self
            .api(&[
                ("action", "wbgetentities"),
                ("ids", qid),
                ("props", "labels"),
                ("languages", languages.as_str()),
                ("languagefallback", "1"),
            ])
            .await;

        match result.map(|body| parse_label_response(&body, qid, &self.languages)) {
            Ok(Ok(label)) => label,
            Ok(Err(e)) => {
                debug!(qid = %qid, error = %e, "label parse failed");
                qid.to_string()
            }
            Err(e) => {
                debug!(qid = %qid, error = %e, "label fetch failed");
                qid.to_string()
            }
        }
    }
}

#[async_trait]
impl KnowledgeBase for WikidataClient {
    async fn around(&self, query: &AroundQuery) -> Result<Vec<CandidateEntity>> {
        let body = self.sparql(&query.to_sparql()).await?;
        let entities = parse_around_response(&body)?;
        debug!(
            count = entities.len(),
            radius_m = query.radius_m,
            center = %query.center,
            "around query complete"
        );
        Ok(entities)
    }

    async fn instance_label(&self, qid: &str) -> Result<Option<String>> {
        let body = self.sparql(&instance_label_query(qid, &self.languages)).await?;
        Ok(parse_instance_label_response(&body)?)
    }

    async fn entity_metadata(&self, qid: &str) -> Result<Option<EntityMetadata>> {
        let languages = self.languages.replace(',', "|");
        let body = self
            .api(&[
                ("action", "wbgetentities"),
                ("ids", qid),
                ("props", "labels|claims"),
                ("languages", languages.as_str()),
                ("languagefallback", "1"),
            ])
            .await?;

        let Some(mut metadata) = parse_entity_response(&body, qid, &self.languages)? else {
            return Ok(None);
        };

        if let Some(id) = metadata.admin_area.take() {
            metadata.admin_area = Some(self.label_or_id(&id).await);
        }
        if let Some(id) = metadata.country.take() {
            metadata.country = Some(self.label_or_id(&id).await);
        }

        Ok(Some(metadata))
    }

    async fn search(&self, text: &str) -> Result<Vec<SearchHit>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KeHaritaError::InvalidInput("検索語を入力してください".into()));
        }

        let limit = SEARCH_LIMIT.to_string();
        let language = self.primary_language().to_string();
        let body = self
            .api(&[
                ("action", "wbsearchentities"),
                ("search", text),
                ("language", language.as_str()),
                ("uselang", language.as_str()),
                ("limit", limit.as_str()),
            ])
            .await?;

        Ok(parse_search_response(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_language() {
        let mut config = Config::default();
        config.language = " en , tr".into();
        let client = WikidataClient::new(&config).unwrap();
        assert_eq!(client.primary_language(), "en");
    }

    #[tokio::test]
    async fn test_search_rejects_empty_text_before_io() {
        let mut config = Config::default();
        // 到達不能なエンドポイントでもI/O前に弾かれる
        config.api_endpoint = "http://127.0.0.1:9/w/api.php".into();
        let client = WikidataClient::new(&config).unwrap();
        let err = client.search("   ").await.unwrap_err();
        assert!(matches!(err, KeHaritaError::InvalidInput(_)));
    }
}
