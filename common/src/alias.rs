//! フィールド別名テーブル
//!
//! KEデータセットは版ごとにキー名が揺れている（`il` / `city` / `sehir` …）。
//! 取込時にフィールドごとの優先順位付き別名リストで正規化する。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 組み込みテーブルの版
pub const ALIAS_TABLE_VERSION: u32 = 2;

/// 正規化後のフィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Name,
    Kind,
    Lat,
    Lon,
    Country,
    Region,
    City,
    District,
    Neighborhood,
    Access,
}

/// 優先順位付き別名定義
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAliasTable {
    pub version: u32,
    pub id: Vec<String>,
    pub name: Vec<String>,
    #[serde(rename = "type")]
    pub kind: Vec<String>,
    pub lat: Vec<String>,
    pub lon: Vec<String>,
    pub country: Vec<String>,
    pub region: Vec<String>,
    pub city: Vec<String>,
    pub district: Vec<String>,
    pub neighborhood: Vec<String>,
    pub access: Vec<String>,
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl FieldAliasTable {
    /// 組み込みテーブル
    ///
    /// v1: 短縮キー（`i`, `n`, `la`, `lo` …）
    /// v2: v1 + 旧版の長いキー（`city`, `sehir`, `ilce` …）
    pub fn builtin() -> Self {
        Self {
            version: ALIAS_TABLE_VERSION,
            id: keys(&["i", "id"]),
            name: keys(&["n", "name"]),
            kind: keys(&["t", "type"]),
            lat: keys(&["la", "lat"]),
            lon: keys(&["lo", "lng", "lon"]),
            country: keys(&["c", "country"]),
            region: keys(&["r", "region"]),
            city: keys(&["il", "city", "sehir", "ci", "s"]),
            district: keys(&["ilce", "district", "ilçe", "d"]),
            neighborhood: keys(&["m", "mahalle"]),
            access: keys(&["a", "erisim"]),
        }
    }

    /// JSONファイルから読み込み
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// JSON文字列から読み込み
    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        Ok(table)
    }

    /// フィールドの別名リスト（優先順）
    pub fn aliases(&self, field: Field) -> &[String] {
        match field {
            Field::Id => &self.id,
            Field::Name => &self.name,
            Field::Kind => &self.kind,
            Field::Lat => &self.lat,
            Field::Lon => &self.lon,
            Field::Country => &self.country,
            Field::Region => &self.region,
            Field::City => &self.city,
            Field::District => &self.district,
            Field::Neighborhood => &self.neighborhood,
            Field::Access => &self.access,
        }
    }

    fn aliases_mut(&mut self, field: Field) -> &mut Vec<String> {
        match field {
            Field::Id => &mut self.id,
            Field::Name => &mut self.name,
            Field::Kind => &mut self.kind,
            Field::Lat => &mut self.lat,
            Field::Lon => &mut self.lon,
            Field::Country => &mut self.country,
            Field::Region => &mut self.region,
            Field::City => &mut self.city,
            Field::District => &mut self.district,
            Field::Neighborhood => &mut self.neighborhood,
            Field::Access => &mut self.access,
        }
    }

    const FIELDS: [Field; 11] = [
        Field::Id,
        Field::Name,
        Field::Kind,
        Field::Lat,
        Field::Lon,
        Field::Country,
        Field::Region,
        Field::City,
        Field::District,
        Field::Neighborhood,
        Field::Access,
    ];

    /// 設定をマージ（後から追加した別名が優先）
    pub fn merge(&mut self, other: &FieldAliasTable) {
        for field in Self::FIELDS {
            let extra = other.aliases(field);
            if extra.is_empty() {
                continue;
            }
            let current = self.aliases_mut(field);
            current.retain(|k| !extra.contains(k));
            let mut merged = extra.to_vec();
            merged.append(current);
            *current = merged;
        }
        self.version = self.version.max(other.version);
    }

    /// 最初に見つかった空でない値を返す
    pub fn resolve<'a>(&self, record: &'a Map<String, Value>, field: Field) -> Option<&'a Value> {
        self.aliases(field)
            .iter()
            .filter_map(|key| record.get(key))
            .find(|v| !is_blank(v))
    }

    /// 文字列として解決（数値も文字列化）
    pub fn resolve_string(&self, record: &Map<String, Value>, field: Field) -> String {
        match self.resolve(record, field) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// 数値として解決（数値文字列も可）
    pub fn resolve_f64(&self, record: &Map<String, Value>, field: Field) -> Option<f64> {
        match self.resolve(record, field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 非負整数として解決
    pub fn resolve_u64(&self, record: &Map<String, Value>, field: Field) -> Option<u64> {
        match self.resolve(record, field)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// テーブルにないキーを収集
    pub fn unknown_keys<'a>(&self, record: &'a Map<String, Value>) -> BTreeSet<&'a str> {
        record
            .keys()
            .filter(|k| !Self::FIELDS.iter().any(|f| self.aliases(*f).contains(k)))
            .map(|k| k.as_str())
            .collect()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
