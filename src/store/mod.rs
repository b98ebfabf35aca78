//! リモートストア
//!
//! キー付き・プッシュ購読型のJSONツリー。コレクションは
//! `newItems/{keId}`, `matches/{keId}`, `users/{userId}` の3つ。
//! 書き込みはキー単位の後勝ち（マージなし）。

mod firebase;
mod memory;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use crate::error::{KeHaritaError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// ユーザー集計のコレクション
pub const USERS: &str = "users";

/// 購読で流れてくるイベント
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// コレクション全体の最新値（存在しなければ空）
    Snapshot(Map<String, Value>),
    /// 購読が失敗した（以後イベントは来ない）
    Failed(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// パスの値を取得（存在しなければ None）
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// パスに値を書き込む（既存値は置換）
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// コレクションを購読する
    ///
    /// 最初に現在値の Snapshot が1回届き、以後は変更のたびに届く。
    async fn subscribe(&self, collection: &str) -> Result<mpsc::Receiver<StoreEvent>>;
}

/// パスをセグメントに分割して検証
pub(crate) fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(KeHaritaError::InvalidInput("パスが空です".into()));
    }
    for s in &segments {
        if s.contains(|c: char| matches!(c, '.' | '#' | '$' | '[' | ']')) {
            return Err(KeHaritaError::InvalidInput(format!(
                "パスに使用できない文字が含まれています: {}",
                path
            )));
        }
    }
    Ok(segments)
}

/// ツリーの値を参照
pub(crate) fn value_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for s in segments {
        node = node.as_object()?.get(*s)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// ツリーに値を書き込む
///
/// 途中のノードはオブジェクトとして作る。null は削除として扱い、
/// 空になった親も取り除く。
pub(crate) fn set_at(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = if value.is_null() { Value::Object(Map::new()) } else { value };
        return;
    };

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };

    if parents.is_empty() {
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
        return;
    }

    let head = parents[0];
    if value.is_null() && !map.contains_key(head) {
        return;
    }
    let child = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_at(child, &segments[1..], value);

    if child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(head);
    }
}

/// コレクションのオブジェクトを取り出す（なければ空）
pub(crate) fn collection_map(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// コレクション全体を取得（なければ空）
pub async fn fetch_collection(store: &dyn RemoteStore, collection: &str) -> Result<Map<String, Value>> {
    let value = store.get(collection).await?;
    Ok(collection_map(value.as_ref()))
}
