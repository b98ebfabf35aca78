//! 作業履歴（ランキングと最近の操作）

use crate::types::{MatchDecision, NewItemReport, UserStats};
use serde_json::{Map, Value};

/// 最近の操作1件
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEntry {
    Match(MatchDecision),
    NewItem(NewItemReport),
}

impl ActivityEntry {
    pub fn timestamp(&self) -> i64 {
        match self {
            ActivityEntry::Match(m) => m.timestamp,
            ActivityEntry::NewItem(n) => n.timestamp,
        }
    }

    pub fn user_name(&self) -> &str {
        match self {
            ActivityEntry::Match(m) => &m.user_name,
            ActivityEntry::NewItem(n) => &n.user_name,
        }
    }

    /// 表示用の説明
    pub fn describe(&self) -> String {
        match self {
            ActivityEntry::Match(m) => format!("KE {} → {}", m.ke_id, m.qid),
            ActivityEntry::NewItem(n) => format!("KE {} 新規項目", n.ke_id),
        }
    }
}

/// コレクションの生データを型付きレコードに変換（壊れた行は捨てる）
pub fn parse_records<T: serde::de::DeserializeOwned>(records: &Map<String, Value>) -> Vec<T> {
    records
        .values()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

/// 件数の多い順に上位 `limit` 人
pub fn leaderboard(users: &Map<String, Value>, limit: usize) -> Vec<UserStats> {
    let mut stats: Vec<UserStats> = parse_records(users);
    stats.sort_by(|a, b| b.total_count.cmp(&a.total_count));
    stats.truncate(limit);
    stats
}

/// 新しい順に最近の操作 `limit` 件
pub fn recent_activity(
    new_items: &[NewItemReport],
    matches: &[MatchDecision],
    limit: usize,
) -> Vec<ActivityEntry> {
    let mut entries: Vec<ActivityEntry> = new_items
        .iter()
        .cloned()
        .map(ActivityEntry::NewItem)
        .chain(matches.iter().cloned().map(ActivityEntry::Match))
        .collect();
    entries.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    entries.truncate(limit);
    entries
}

/// 経過時間の表示
pub fn time_ago(now_ms: i64, timestamp_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms).max(0);
    let minutes = diff / 60_000;
    let hours = diff / 3_600_000;
    let days = diff / 86_400_000;

    if minutes < 1 {
        "たった今".to_string()
    } else if minutes < 60 {
        format!("{}分前", minutes)
    } else if hours < 24 {
        format!("{}時間前", hours)
    } else {
        format!("{}日前", days)
    }
}
