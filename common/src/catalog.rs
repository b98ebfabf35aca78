//! KEカタログの取込
//!
//! 同梱データは Base64(UTF-8 JSON配列)。`const encodedKEData = "...";`
//! のようなJSラッパーに入っていても中身の文字列だけを取り出す。

use crate::alias::{Field, FieldAliasTable};
use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::types::{CatalogPoint, PointStatus};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// 取込時に弾いた行
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

/// 取込結果
#[derive(Debug, Clone, Default)]
pub struct CatalogLoad {
    pub points: Vec<CatalogPoint>,
    pub rejected: Vec<RejectedRow>,
    pub unknown_keys: BTreeSet<String>,
}

/// ロード済みカタログ
///
/// 反復順はロード順。ID→位置の索引を持つ。
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    points: Vec<CatalogPoint>,
    index: HashMap<u64, usize>,
}

impl Catalog {
    pub fn new(points: Vec<CatalogPoint>) -> Self {
        let index = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        Self { points, index }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&CatalogPoint> {
        self.index.get(&id).map(|&i| &self.points[i])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn points(&self) -> &[CatalogPoint] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [CatalogPoint] {
        &mut self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogPoint> {
        self.points.iter()
    }
}

impl From<CatalogLoad> for Catalog {
    fn from(load: CatalogLoad) -> Self {
        Catalog::new(load.points)
    }
}

/// JSラッパーを外してBase64本体を返す
pub fn extract_encoded_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let is_quote = |c: char| matches!(c, '"' | '\'' | '`');
    match (trimmed.find(is_quote), trimmed.rfind(is_quote)) {
        (Some(start), Some(end)) if end > start => trimmed[start + 1..end].trim(),
        _ => trimmed,
    }
}

/// Base64 → UTF-8 文字列
pub fn decode_payload(encoded: &str) -> Result<String> {
    let compact: String = extract_encoded_payload(encoded)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("Base64デコード失敗: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("UTF-8ではありません: {}", e)))
}

/// エンコード済みカタログを読み込む
pub fn decode_catalog(encoded: &str, table: &FieldAliasTable) -> Result<CatalogLoad> {
    let json = decode_payload(encoded)?;
    parse_catalog_json(&json, table)
}

/// デコード済みJSON配列を読み込む
pub fn parse_catalog_json(json: &str, table: &FieldAliasTable) -> Result<CatalogLoad> {
    let value: Value = serde_json::from_str(json)?;
    let rows = value
        .as_array()
        .ok_or_else(|| Error::Parse("カタログはJSON配列である必要があります".into()))?;

    let mut load = CatalogLoad::default();
    let mut seen = std::collections::HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let Some(record) = row.as_object() else {
            load.rejected.push(RejectedRow {
                index,
                reason: "オブジェクトではありません".into(),
            });
            continue;
        };

        for key in table.unknown_keys(record) {
            load.unknown_keys.insert(key.to_string());
        }

        match point_from_record(record, table) {
            Ok(point) => {
                if seen.insert(point.id) {
                    load.points.push(point);
                } else {
                    load.rejected.push(RejectedRow {
                        index,
                        reason: format!("ID {} が重複しています", point.id),
                    });
                }
            }
            Err(reason) => load.rejected.push(RejectedRow { index, reason }),
        }
    }

    if !load.unknown_keys.is_empty() {
        warn!(
            keys = ?load.unknown_keys,
            table_version = table.version,
            "別名テーブルにないキーがあります"
        );
    }
    if !load.rejected.is_empty() {
        warn!(count = load.rejected.len(), "取込できない行をスキップしました");
        for row in &load.rejected {
            debug!(index = row.index, reason = %row.reason, "rejected row");
        }
    }

    Ok(load)
}

fn point_from_record(
    record: &Map<String, Value>,
    table: &FieldAliasTable,
) -> std::result::Result<CatalogPoint, String> {
    let id = table
        .resolve_u64(record, Field::Id)
        .ok_or_else(|| "IDがありません".to_string())?;

    let lat = table
        .resolve_f64(record, Field::Lat)
        .ok_or_else(|| format!("ID {}: 緯度がありません", id))?;
    let lon = table
        .resolve_f64(record, Field::Lon)
        .ok_or_else(|| format!("ID {}: 経度がありません", id))?;
    let coordinate = Coordinate::new(lat, lon).map_err(|e| format!("ID {}: {}", id, e))?;

    Ok(CatalogPoint {
        id,
        name: table.resolve_string(record, Field::Name),
        kind: table.resolve_string(record, Field::Kind),
        country: table.resolve_string(record, Field::Country),
        region: table.resolve_string(record, Field::Region),
        city: table.resolve_string(record, Field::City),
        district: table.resolve_string(record, Field::District),
        neighborhood: table.resolve_string(record, Field::Neighborhood),
        access_note: table.resolve_string(record, Field::Access),
        coordinate,
        status: PointStatus::Unmatched,
    })
}

/// JSON配列をBase64化（データ作成・テスト用）
pub fn encode_catalog_json(json: &str) -> String {
    STANDARD.encode(json.as_bytes())
}
