//! エラー型定義

use thiserror::Error;

/// 共通エラー型
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// 入力値の不正（I/O前に弾くべきもの）かどうか
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Error::InvalidCoordinate(_) | Error::InvalidInput(_))
    }
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
