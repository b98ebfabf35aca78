//! データモデル
//!
//! - CatalogPoint: KE（Kültür Envanteri）カタログの1地点
//! - MatchDecision / NewItemReport: リモートストアに保存される判定記録
//! - UserStats: ユーザーごとの集計
//! - CandidateEntity: 半径検索の結果（保存しない）

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};

/// KE地点の照合状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PointStatus {
    /// 未照合
    #[default]
    Unmatched,
    /// 既存QIDと紐付け済み
    Matched,
    /// 新規項目として報告済み
    ReportedNew,
}

impl PointStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PointStatus::Unmatched => "未照合",
            PointStatus::Matched => "照合済み",
            PointStatus::ReportedNew => "新規報告",
        }
    }
}

/// KEカタログの1地点
///
/// `status` 以外はロード後に変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPoint {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub district: String,
    pub neighborhood: String,
    pub access_note: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub status: PointStatus,
}

impl CatalogPoint {
    /// 最小構成で生成（テスト・手入力用）
    pub fn new(id: u64, name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            id,
            name: name.into(),
            kind: String::new(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            district: String::new(),
            neighborhood: String::new(),
            access_note: String::new(),
            coordinate,
            status: PointStatus::Unmatched,
        }
    }

    pub fn is_unmatched(&self) -> bool {
        self.status == PointStatus::Unmatched
    }

    /// 表示用の所在地（市 / 区 / 地区）
    pub fn location_line(&self) -> String {
        [&self.city, &self.district, &self.neighborhood]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// 照合者の識別情報（名前ベース、認証なし）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub user_id: String,
}

impl UserIdentity {
    /// 名前とタイムスタンプ(ms)からIDを生成
    ///
    /// `user_<小文字化・空白を_に置換した名前>_<タイムスタンプ末尾6桁>`
    /// 空の名前は None。
    pub fn from_name(name: &str, timestamp_ms: i64) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let slug: String = name
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect::<String>()
            .to_lowercase();
        let ts = timestamp_ms.unsigned_abs().to_string();
        let suffix = &ts[ts.len().saturating_sub(6)..];

        Some(Self {
            name: name.to_string(),
            user_id: format!("user_{}_{}", slug, suffix),
        })
    }
}

/// `matches/{keId}` に保存される照合記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDecision {
    pub ke_id: u64,
    pub qid: String,
    pub timestamp: i64,
    pub user_name: String,
    pub user_id: String,
    #[serde(default)]
    pub name: String,
}

/// `newItems/{keId}` に保存される新規項目報告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItemReport {
    pub ke_id: u64,
    pub timestamp: i64,
    pub user_name: String,
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
}

/// 判定の種類（ユーザー集計の更新に使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Match,
    NewItem,
}

/// `users/{userId}` に保存されるユーザー集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub name: String,
    pub match_count: u64,
    pub new_item_count: u64,
    pub total_count: u64,
    pub last_activity: i64,
}

impl UserStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 判定1件分を加算
    pub fn record(&mut self, kind: DecisionKind, timestamp_ms: i64) {
        match kind {
            DecisionKind::Match => self.match_count += 1,
            DecisionKind::NewItem => self.new_item_count += 1,
        }
        self.total_count += 1;
        self.last_activity = timestamp_ms;
    }
}

/// 半径検索で得た近傍エンティティ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateEntity {
    pub qid: String,
    pub label: String,
    pub coordinate: Coordinate,
    /// 基準点からの距離 (m)
    pub distance_m: f64,
    /// P31（instance of）のラベル
    pub category: Option<String>,
    /// P11729（KE ID）の逆参照
    pub catalog_ref: Option<String>,
}

/// wbgetentities から得る表示用メタデータ
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityMetadata {
    pub qid: String,
    pub label: String,
    pub coordinate: Option<Coordinate>,
    /// P131（所在行政区）
    pub admin_area: Option<String>,
    /// P17（国）
    pub country: Option<String>,
    /// P11729（KE ID）
    pub catalog_ref: Option<String>,
}

/// wbsearchentities の検索結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}
