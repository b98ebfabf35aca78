//! Wikidataクエリの構築とレスポンスのパース
//!
//! - AroundQuery: `wikibase:around` による半径検索
//! - parse_around_response: SPARQL JSON結果 → CandidateEntity
//! - parse_entity_response: wbgetentities → EntityMetadata
//! - parse_search_response: wbsearchentities → SearchHit

use crate::error::{Error, Result};
use crate::geo::{parse_wkt_point, Coordinate};
use crate::types::{CandidateEntity, EntityMetadata, SearchHit};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// 表示ラベルの言語（優先順）
pub const DEFAULT_LANGUAGES: &str = "tr,en";

/// coordinate location
pub const PROP_COORDINATE: &str = "P625";
/// located in the administrative territorial entity
pub const PROP_ADMIN_AREA: &str = "P131";
/// country
pub const PROP_COUNTRY: &str = "P17";
/// Kültür Envanteri ID
pub const PROP_CATALOG_ID: &str = "P11729";

lazy_static! {
    static ref QID: Regex = Regex::new(r"^[Qq][1-9][0-9]*$").unwrap();
}

/// QID形式（`Q123`）を検証して大文字に正規化
pub fn normalize_qid(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if QID.is_match(last) {
        Ok(last.to_uppercase())
    } else {
        Err(Error::InvalidInput(format!("QIDの形式ではありません: {}", input)))
    }
}

/// 半径検索の絞り込み条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter {
    /// P31（instance of）を持つものに限定
    pub require_instance_of: bool,
    /// 既にP11729（KE ID）を持つものを除外
    pub exclude_cataloged: bool,
    /// P11729 をオプションで取得
    pub include_catalog_ref: bool,
}

impl CategoryFilter {
    /// KE地点のレビュー用（未紐付けのみ）
    pub fn for_point_review() -> Self {
        Self {
            require_instance_of: true,
            exclude_cataloged: true,
            include_catalog_ref: false,
        }
    }

    /// 任意座標の検索用（紐付け済みも表示）
    pub fn for_coordinate_search() -> Self {
        Self {
            require_instance_of: false,
            exclude_cataloged: false,
            include_catalog_ref: true,
        }
    }
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self::for_point_review()
    }
}

/// `wikibase:around` 半径検索クエリ
#[derive(Debug, Clone, PartialEq)]
pub struct AroundQuery {
    pub center: Coordinate,
    pub radius_m: f64,
    pub filter: CategoryFilter,
    pub languages: String,
}

impl AroundQuery {
    /// 半径 (m) を検証して生成
    pub fn new(center: Coordinate, radius_m: f64, filter: CategoryFilter) -> Result<Self> {
        center.validate()?;
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "検索半径は正の値である必要があります: {}",
                radius_m
            )));
        }
        Ok(Self {
            center,
            radius_m,
            filter,
            languages: DEFAULT_LANGUAGES.to_string(),
        })
    }

    pub fn with_languages(mut self, languages: &str) -> Self {
        if !languages.trim().is_empty() {
            self.languages = languages.trim().to_string();
        }
        self
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_m / 1000.0
    }

    /// SPARQL文字列を生成
    pub fn to_sparql(&self) -> String {
        let mut select = String::from("?item ?itemLabel ?location");
        if self.filter.include_catalog_ref {
            select.push_str(" ?keId");
        }

        let mut clauses = Vec::new();
        if self.filter.require_instance_of {
            clauses.push("FILTER EXISTS { ?item wdt:P31 ?type }".to_string());
        }
        if self.filter.exclude_cataloged {
            clauses.push(format!("FILTER NOT EXISTS {{ ?item wdt:{} ?keId }}", PROP_CATALOG_ID));
        } else if self.filter.include_catalog_ref {
            clauses.push(format!("OPTIONAL {{ ?item wdt:{} ?keId. }}", PROP_CATALOG_ID));
        }

        format!(
            r#"SELECT {select} WHERE {{
  SERVICE wikibase:around {{
    ?item wdt:{coord} ?location.
    bd:serviceParam wikibase:center "{center}"^^geo:wktLiteral.
    bd:serviceParam wikibase:radius "{radius}".
  }}
  {clauses}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "{lang}". }}
}}"#,
            select = select,
            coord = PROP_COORDINATE,
            center = self.center.to_wkt(),
            radius = self.radius_km(),
            clauses = clauses.join("\n  "),
            lang = self.languages,
        )
    }
}

/// P31ラベルを1件取得するクエリ
pub fn instance_label_query(qid: &str, languages: &str) -> String {
    format!(
        r#"SELECT ?typeLabel WHERE {{
  wd:{qid} wdt:P31 ?type .
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "{lang}". }}
}} LIMIT 1"#,
        qid = qid,
        lang = languages,
    )
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<serde_json::Map<String, Value>>,
}

fn binding_value<'a>(binding: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a str> {
    binding.get(name)?.get("value")?.as_str()
}

fn parse_sparql(json: &str) -> Result<Vec<serde_json::Map<String, Value>>> {
    let response: SparqlResponse = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("SPARQLレスポンスのパースに失敗: {}", e)))?;
    Ok(response.results.bindings)
}

/// 半径検索の結果をパース
///
/// 座標を解釈できない行は捨てる。距離は0で返し、呼び出し側で計算する。
pub fn parse_around_response(json: &str) -> Result<Vec<CandidateEntity>> {
    let bindings = parse_sparql(json)?;
    let mut entities = Vec::with_capacity(bindings.len());

    for binding in &bindings {
        let Some(uri) = binding_value(binding, "item") else {
            continue;
        };
        let qid = uri.rsplit('/').next().unwrap_or(uri).to_string();

        let coordinate = match binding_value(binding, "location").map(parse_wkt_point) {
            Some(Ok(c)) => c,
            _ => {
                debug!(qid = %qid, "座標を解釈できないため除外");
                continue;
            }
        };

        let label = binding_value(binding, "itemLabel")
            .map(str::to_string)
            .unwrap_or_else(|| qid.clone());
        let catalog_ref = binding_value(binding, "keId").map(str::to_string);

        entities.push(CandidateEntity {
            qid,
            label,
            coordinate,
            distance_m: 0.0,
            category: None,
            catalog_ref,
        });
    }

    Ok(entities)
}

/// P31ラベルクエリの結果をパース
pub fn parse_instance_label_response(json: &str) -> Result<Option<String>> {
    let bindings = parse_sparql(json)?;
    Ok(bindings
        .first()
        .and_then(|b| binding_value(b, "typeLabel"))
        .map(str::to_string))
}

/// wbgetentities のラベルを言語優先順で取得（なければQID）
fn entity_label(entity: &Value, qid: &str, languages: &str) -> String {
    languages
        .split(',')
        .map(str::trim)
        .find_map(|lang| entity["labels"][lang]["value"].as_str())
        .unwrap_or(qid)
        .to_string()
}

fn first_claim_value<'a>(entity: &'a Value, prop: &str) -> Option<&'a Value> {
    entity["claims"][prop][0]["mainsnak"]["datavalue"].get("value")
}

/// wbgetentities レスポンスをパース
///
/// P131/P17 はIDのまま返す（ラベル解決は呼び出し側）。
/// エンティティが存在しなければ None。
pub fn parse_entity_response(json: &str, qid: &str, languages: &str) -> Result<Option<EntityMetadata>> {
    let root: Value = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("wbgetentitiesのパースに失敗: {}", e)))?;

    let entity = &root["entities"][qid];
    if entity.is_null() || entity.get("missing").is_some() {
        return Ok(None);
    }

    let coordinate = first_claim_value(entity, PROP_COORDINATE).and_then(|v| {
        let lat = v["latitude"].as_f64()?;
        let lon = v["longitude"].as_f64()?;
        Coordinate::new(lat, lon).ok()
    });

    let item_id = |prop: &str| {
        first_claim_value(entity, prop)
            .and_then(|v| v["id"].as_str())
            .map(str::to_string)
    };

    let catalog_ref = first_claim_value(entity, PROP_CATALOG_ID).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(Some(EntityMetadata {
        qid: qid.to_string(),
        label: entity_label(entity, qid, languages),
        coordinate,
        admin_area: item_id(PROP_ADMIN_AREA),
        country: item_id(PROP_COUNTRY),
        catalog_ref,
    }))
}

/// ラベルのみのwbgetentitiesレスポンスをパース
pub fn parse_label_response(json: &str, qid: &str, languages: &str) -> Result<String> {
    let root: Value = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("wbgetentitiesのパースに失敗: {}", e)))?;
    Ok(entity_label(&root["entities"][qid], qid, languages))
}

/// wbsearchentities レスポンスをパース
pub fn parse_search_response(json: &str) -> Result<Vec<SearchHit>> {
    #[derive(Deserialize)]
    struct SearchResponse {
        #[serde(default)]
        search: Vec<SearchHit>,
    }

    let response: SearchResponse = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("wbsearchentitiesのパースに失敗: {}", e)))?;
    Ok(response.search)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center() -> Coordinate {
        Coordinate::new(41.0, 29.0).unwrap()
    }

    #[test]
    fn test_around_query_point_review() {
        let q = AroundQuery::new(center(), 100.0, CategoryFilter::for_point_review()).unwrap();
        let sparql = q.to_sparql();
        assert!(sparql.contains(r#""Point(29 41)"^^geo:wktLiteral"#));
        assert!(sparql.contains(r#"wikibase:radius "0.1""#));
        assert!(sparql.contains("FILTER EXISTS { ?item wdt:P31 ?type }"));
        assert!(sparql.contains("FILTER NOT EXISTS { ?item wdt:P11729 ?keId }"));
        assert!(!sparql.contains("OPTIONAL"));
        assert!(sparql.contains(r#"wikibase:language "tr,en""#));
    }

    #[test]
    fn test_around_query_coordinate_search() {
        let q = AroundQuery::new(center(), 250.0, CategoryFilter::for_coordinate_search())
            .unwrap()
            .with_languages("en");
        let sparql = q.to_sparql();
        assert!(sparql.contains("SELECT ?item ?itemLabel ?location ?keId"));
        assert!(sparql.contains("OPTIONAL { ?item wdt:P11729 ?keId. }"));
        assert!(!sparql.contains("FILTER"));
        assert!(sparql.contains(r#"wikibase:radius "0.25""#));
        assert!(sparql.contains(r#"wikibase:language "en""#));
    }

    #[test]
    fn test_around_query_rejects_bad_radius() {
        for r in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = AroundQuery::new(center(), r, CategoryFilter::default()).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "radius {}", r);
        }
    }

    #[test]
    fn test_around_query_rejects_bad_center() {
        let bad = Coordinate { lat: 120.0, lon: 0.0 };
        let err = AroundQuery::new(bad, 100.0, CategoryFilter::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidCoordinate(_)));
    }

    #[test]
    fn test_parse_around_response() {
        let json = r#"{
          "head": {"vars": ["item", "itemLabel", "location", "keId"]},
          "results": {"bindings": [
            {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q123"},
             "itemLabel": {"type": "literal", "value": "Galata Kulesi"},
             "location": {"type": "literal", "value": "Point(28.9742 41.0256)"},
             "keId": {"type": "literal", "value": "5567"}},
            {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q999"},
             "itemLabel": {"type": "literal", "value": "Broken"},
             "location": {"type": "literal", "value": "not a point"}},
            {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q5"},
             "location": {"type": "literal", "value": "Point(29 41)"}}
          ]}
        }"#;
        let entities = parse_around_response(json).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].qid, "Q123");
        assert_eq!(entities[0].label, "Galata Kulesi");
        assert_eq!(entities[0].coordinate.lat, 41.0256);
        assert_eq!(entities[0].catalog_ref.as_deref(), Some("5567"));
        assert_eq!(entities[1].qid, "Q5");
        assert_eq!(entities[1].label, "Q5");
        assert!(entities[1].catalog_ref.is_none());
    }

    #[test]
    fn test_parse_around_response_empty() {
        let json = r#"{"head": {"vars": []}, "results": {"bindings": []}}"#;
        assert!(parse_around_response(json).unwrap().is_empty());
    }

    #[test]
    fn test_parse_around_response_invalid() {
        assert!(matches!(parse_around_response("<html>"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_instance_label() {
        let json = r#"{"results": {"bindings": [{"typeLabel": {"type": "literal", "value": "cami"}}]}}"#;
        assert_eq!(parse_instance_label_response(json).unwrap().as_deref(), Some("cami"));
        let empty = r#"{"results": {"bindings": []}}"#;
        assert_eq!(parse_instance_label_response(empty).unwrap(), None);
    }

    #[test]
    fn test_parse_entity_response() {
        let json = r#"{"entities": {"Q123": {
            "labels": {"en": {"language": "en", "value": "Galata Tower"}, "tr": {"language": "tr", "value": "Galata Kulesi"}},
            "claims": {
              "P625": [{"mainsnak": {"datavalue": {"value": {"latitude": 41.0256, "longitude": 28.9742}}}}],
              "P131": [{"mainsnak": {"datavalue": {"value": {"id": "Q1"}}}}],
              "P17": [{"mainsnak": {"datavalue": {"value": {"id": "Q43"}}}}],
              "P11729": [{"mainsnak": {"datavalue": {"value": "5567"}}}]
            }
        }}}"#;
        let meta = parse_entity_response(json, "Q123", "tr,en").unwrap().unwrap();
        assert_eq!(meta.label, "Galata Kulesi");
        assert_eq!(meta.coordinate.unwrap().lon, 28.9742);
        assert_eq!(meta.admin_area.as_deref(), Some("Q1"));
        assert_eq!(meta.country.as_deref(), Some("Q43"));
        assert_eq!(meta.catalog_ref.as_deref(), Some("5567"));
    }

    #[test]
    fn test_parse_entity_response_fallbacks() {
        let json = r#"{"entities": {"Q7": {"labels": {"en": {"value": "Thing"}}, "claims": {}}}}"#;
        let meta = parse_entity_response(json, "Q7", "tr,en").unwrap().unwrap();
        assert_eq!(meta.label, "Thing");
        assert!(meta.coordinate.is_none());
        assert!(meta.admin_area.is_none());

        let no_label = r#"{"entities": {"Q8": {"labels": {}, "claims": {}}}}"#;
        assert_eq!(parse_entity_response(no_label, "Q8", "tr,en").unwrap().unwrap().label, "Q8");

        let missing = r#"{"entities": {"Q9": {"id": "Q9", "missing": ""}}}"#;
        assert!(parse_entity_response(missing, "Q9", "tr,en").unwrap().is_none());
    }

    #[test]
    fn test_parse_search_response() {
        let json = r#"{"search": [
            {"id": "Q406", "label": "İstanbul", "description": "Türkiye'nin en kalabalık şehri"},
            {"id": "Q1", "label": "evren"}
        ]}"#;
        let hits = parse_search_response(json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "Q406");
        assert_eq!(hits[1].description, "");
        assert!(parse_search_response("{}").unwrap().is_empty());
    }

    #[test]
    fn test_normalize_qid() {
        assert_eq!(normalize_qid("q42").unwrap(), "Q42");
        assert_eq!(normalize_qid(" Q123 ").unwrap(), "Q123");
        assert_eq!(normalize_qid("http://www.wikidata.org/entity/Q5").unwrap(), "Q5");
        assert!(normalize_qid("Q0").is_err());
        assert!(normalize_qid("P31").is_err());
        assert!(normalize_qid("").is_err());
    }
}
