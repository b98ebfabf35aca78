//! Firebase Realtime Database（REST API）
//!
//! - 取得: `GET {base}/{path}.json`
//! - 書込: `PUT {base}/{path}.json`
//! - 購読: `Accept: text/event-stream` のストリーミング
//!
//! ストリームの `put` / `patch` イベントをローカルのコピーに適用し、
//! 変化のたびにコレクション全体を Snapshot として流す。

use super::{collection_map, set_at, split_path, RemoteStore, StoreEvent};
use crate::error::{KeHaritaError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 16;

pub struct FirebaseStore {
    base_url: String,
    auth: Option<String>,
    client: Client,
    /// ストリーミング用（タイムアウトなし）
    stream_client: Client,
}

impl FirebaseStore {
    pub fn new(base_url: &str, auth: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(KeHaritaError::Config(format!(
                "ストアURLが不正です: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeHaritaError::Config(format!("HTTPクライアントの作成に失敗: {}", e)))?;
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| KeHaritaError::Config(format!("HTTPクライアントの作成に失敗: {}", e)))?;

        Ok(Self {
            base_url,
            auth,
            client,
            stream_client,
        })
    }

    fn url(&self, path: &str) -> Result<String> {
        let segments = split_path(path)?;
        Ok(format!("{}/{}.json", self.base_url, segments.join("/")))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        self.auth
            .iter()
            .map(|token| ("auth", token.clone()))
            .collect()
    }
}

async fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(KeHaritaError::Unavailable(format!(
        "{} への要求が失敗しました ({}): {}",
        path, status, body
    )))
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let url = self.url(path)?;
        debug!(path = %path, "firebase GET");

        let response = self.client.get(&url).query(&self.query()).send().await?;
        let response = check_status(response, path).await?;
        let value: Value = response.json().await?;

        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let url = self.url(path)?;
        debug!(path = %path, "firebase PUT");

        let response = self
            .client
            .put(&url)
            .query(&self.query())
            .json(&value)
            .send()
            .await?;
        check_status(response, path).await?;
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<mpsc::Receiver<StoreEvent>> {
        let url = self.url(collection)?;
        let collection = collection.to_string();

        let response = self
            .stream_client
            .get(&url)
            .query(&self.query())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response, &collection).await?;
        info!(collection = %collection, "firebase subscription opened");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut data = Value::Null;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StoreEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(block) = take_sse_block(&mut buffer) {
                    let Some(event) = parse_sse_block(&block) else {
                        continue;
                    };
                    match apply_stream_event(&mut data, &event) {
                        Ok(true) => {
                            let snapshot = StoreEvent::Snapshot(collection_map(Some(&data)));
                            if tx.send(snapshot).await.is_err() {
                                return;
                            }
                        }
                        Ok(false) => {}
                        Err(message) => {
                            warn!(collection = %collection, error = %message, "firebase subscription closed");
                            let _ = tx.send(StoreEvent::Failed(message)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx
                .send(StoreEvent::Failed("ストリームが切断されました".into()))
                .await;
        });

        Ok(rx)
    }
}

/// SSEの1イベント
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// バッファから完結したブロックを1つ取り出す
///
/// チャンク境界でマルチバイト文字が割れるため、区切りが揃うまでバイトのまま保持する。
pub(crate) fn take_sse_block(buffer: &mut Vec<u8>) -> Option<String> {
    let find = |sep: &[u8]| {
        buffer
            .windows(sep.len())
            .position(|w| w == sep)
            .map(|pos| pos + sep.len())
    };
    let end = match (find(&b"\n\n"[..]), find(&b"\r\n\r\n"[..])) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };
    let block: Vec<u8> = buffer.drain(..end).collect();
    Some(String::from_utf8_lossy(&block).into_owned())
}

/// 空行区切りのブロックをパース
pub(crate) fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.trim_start());
        }
    }

    event.map(|event| SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// イベントをローカルコピーに適用
///
/// 変化があれば `Ok(true)`。購読が終了するイベントは `Err`。
pub(crate) fn apply_stream_event(
    root: &mut Value,
    event: &SseEvent,
) -> std::result::Result<bool, String> {
    match event.event.as_str() {
        "put" => {
            let payload: StreamPayload = serde_json::from_str(&event.data)
                .map_err(|e| format!("putイベントのパースに失敗: {}", e))?;
            let segments: Vec<&str> = payload.path.split('/').filter(|s| !s.is_empty()).collect();
            set_at(root, &segments, payload.data);
            Ok(true)
        }
        "patch" => {
            let payload: StreamPayload = serde_json::from_str(&event.data)
                .map_err(|e| format!("patchイベントのパースに失敗: {}", e))?;
            let base: Vec<&str> = payload.path.split('/').filter(|s| !s.is_empty()).collect();
            let Value::Object(children) = payload.data else {
                return Err("patchイベントのデータがオブジェクトではありません".into());
            };
            for (key, value) in children {
                let mut segments = base.clone();
                segments.extend(key.split('/').filter(|s| !s.is_empty()));
                set_at(root, &segments, value);
            }
            Ok(true)
        }
        "keep-alive" => Ok(false),
        "cancel" => Err(format!("購読がキャンセルされました: {}", event.data)),
        "auth_revoked" => Err("認証が無効になりました".into()),
        other => {
            debug!(event = %other, "unknown firebase event");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> SseEvent {
        SseEvent {
            event: name.into(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_sse_block() {
        let block = "event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n";
        let ev = parse_sse_block(block).unwrap();
        assert_eq!(ev.event, "put");
        assert_eq!(ev.data, r#"{"path":"/","data":null}"#);

        assert!(parse_sse_block(": comment\n\n").is_none());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let raw = "event: put\ndata: {\"path\":\"/1\",\"data\":{\"name\":\"Çeşme\"}}\n\n".as_bytes();
        // "ş" の2バイトの間で分割
        let split = raw.windows(2).position(|w| w == "ş".as_bytes()).unwrap() + 1;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&raw[..split]);
        assert!(take_sse_block(&mut buffer).is_none());

        buffer.extend_from_slice(&raw[split..]);
        let block = take_sse_block(&mut buffer).unwrap();
        assert!(block.contains("Çeşme"));
        assert!(!block.contains('\u{FFFD}'));
        assert!(buffer.is_empty());

        let ev = parse_sse_block(&block).unwrap();
        let mut root = Value::Null;
        apply_stream_event(&mut root, &ev).unwrap();
        assert_eq!(root, json!({"1": {"name": "Çeşme"}}));
    }

    #[test]
    fn test_crlf_blocks_are_separated() {
        let mut buffer = b"event: keep-alive\r\ndata: null\r\n\r\nevent: put\r\n".to_vec();
        let block = take_sse_block(&mut buffer).unwrap();
        assert_eq!(parse_sse_block(&block).unwrap().event, "keep-alive");
        assert_eq!(buffer, b"event: put\r\n".to_vec());
        assert!(take_sse_block(&mut buffer).is_none());
    }

    #[test]
    fn test_put_root_then_child() {
        let mut root = Value::Null;
        apply_stream_event(&mut root, &event("put", json!({"path": "/", "data": {"1": {"qid": "Q1"}}}))).unwrap();
        apply_stream_event(&mut root, &event("put", json!({"path": "/2", "data": {"qid": "Q2"}}))).unwrap();
        assert_eq!(root, json!({"1": {"qid": "Q1"}, "2": {"qid": "Q2"}}));

        apply_stream_event(&mut root, &event("put", json!({"path": "/1", "data": null}))).unwrap();
        assert_eq!(root, json!({"2": {"qid": "Q2"}}));
    }

    #[test]
    fn test_put_root_null_is_empty_collection() {
        let mut root = json!({"1": {}});
        apply_stream_event(&mut root, &event("put", json!({"path": "/", "data": null}))).unwrap();
        assert!(collection_map(Some(&root)).is_empty());
    }

    #[test]
    fn test_patch_merges_children() {
        let mut root = json!({"1": {"qid": "Q1"}});
        apply_stream_event(
            &mut root,
            &event("patch", json!({"path": "/", "data": {"3": {"qid": "Q3"}, "1": null}})),
        )
        .unwrap();
        assert_eq!(root, json!({"3": {"qid": "Q3"}}));
    }

    #[test]
    fn test_keep_alive_and_cancel() {
        let mut root = json!({});
        let keep_alive = SseEvent { event: "keep-alive".into(), data: "null".into() };
        assert_eq!(apply_stream_event(&mut root, &keep_alive), Ok(false));

        let cancel = SseEvent { event: "cancel".into(), data: "permission denied".into() };
        assert!(apply_stream_event(&mut root, &cancel).is_err());

        let revoked = SseEvent { event: "auth_revoked".into(), data: String::new() };
        assert!(apply_stream_event(&mut root, &revoked).is_err());
    }

    #[test]
    fn test_url_building() {
        let store = FirebaseStore::new("https://example.firebaseio.com/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(store.url("matches/12").unwrap(), "https://example.firebaseio.com/matches/12.json");
        assert!(FirebaseStore::new("example.com", None, Duration::from_secs(5)).is_err());
    }
}
