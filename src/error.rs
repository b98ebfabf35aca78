use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeHaritaError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ユーザー名が設定されていません。`keharita config --set-user NAME` で設定するか --user を指定してください")]
    IdentityRequired,

    #[error("リモートサービスに接続できません: {0}")]
    Unavailable(String),

    #[error("入力が不正です: {0}")]
    InvalidInput(String),

    #[error("KE地点が見つかりません: {0}")]
    UnknownPoint(u64),

    #[error("カタログファイルが見つかりません: {0}")]
    CatalogNotFound(String),

    #[error("処理がキャンセルされました")]
    Cancelled,

    #[error(transparent)]
    Common(#[from] keharita_common::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl KeHaritaError {
    /// 一時的な失敗（ユーザーが再実行すれば成功しうる）
    pub fn is_transient(&self) -> bool {
        matches!(self, KeHaritaError::Unavailable(_))
    }

    /// I/O前に弾いた入力不正
    pub fn is_malformed_input(&self) -> bool {
        match self {
            KeHaritaError::InvalidInput(_) | KeHaritaError::UnknownPoint(_) => true,
            KeHaritaError::Common(e) => e.is_malformed_input(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for KeHaritaError {
    fn from(e: reqwest::Error) -> Self {
        KeHaritaError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeHaritaError>;
