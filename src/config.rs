use crate::error::{KeHaritaError, Result};
use keharita_common::UserIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
pub const DEFAULT_API_ENDPOINT: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_name: Option<String>,
    pub user_id: Option<String>,
    pub search_radius_m: f64,
    /// Firebase Realtime Database のURL
    pub store_url: Option<String>,
    pub store_token: Option<String>,
    pub sparql_endpoint: String,
    pub api_endpoint: String,
    pub language: String,
    pub timeout_seconds: u64,
    pub catalog_path: Option<PathBuf>,
    /// 候補ごとにP31ラベルを取得する
    pub enrich_categories: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_name: None,
            user_id: None,
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            store_url: None,
            store_token: None,
            sparql_endpoint: DEFAULT_SPARQL_ENDPOINT.into(),
            api_endpoint: DEFAULT_API_ENDPOINT.into(),
            language: keharita_common::sparql::DEFAULT_LANGUAGES.into(),
            timeout_seconds: 30,
            catalog_path: None,
            enrich_categories: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| KeHaritaError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("keharita").join("config.json"))
    }

    /// ストアのトークン（環境変数を優先）
    pub fn store_token(&self) -> Option<String> {
        match std::env::var("KEHARITA_STORE_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Some(token),
            _ => self.store_token.clone(),
        }
    }

    /// 保存済みの識別情報
    ///
    /// 環境変数 `KEHARITA_USER` が設定ファイルより優先。
    /// IDは保存済みのものを使い、なければ `now_ms` から生成する。
    pub fn identity(&self, now_ms: i64) -> Option<UserIdentity> {
        let env_name = std::env::var("KEHARITA_USER")
            .ok()
            .filter(|n| !n.trim().is_empty());

        if let Some(name) = env_name {
            if self.user_name.as_deref().map(str::trim) != Some(name.trim()) {
                return UserIdentity::from_name(&name, now_ms);
            }
        }

        let name = self.user_name.as_deref()?;
        let mut identity = UserIdentity::from_name(name, now_ms)?;
        if let Some(id) = self.user_id.as_deref().filter(|id| !id.is_empty()) {
            identity.user_id = id.to_string();
        }
        Some(identity)
    }

    /// ユーザー名を設定（IDは新しく生成して固定）
    pub fn set_user(&mut self, name: &str, now_ms: i64) -> Result<UserIdentity> {
        let identity = UserIdentity::from_name(name, now_ms)
            .ok_or_else(|| KeHaritaError::InvalidInput("ユーザー名が空です".into()))?;
        self.user_name = Some(identity.name.clone());
        self.user_id = Some(identity.user_id.clone());
        Ok(identity)
    }

    pub fn set_search_radius(&mut self, radius_m: f64) -> Result<()> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(KeHaritaError::InvalidInput(format!(
                "検索半径は正の値である必要があります: {}",
                radius_m
            )));
        }
        self.search_radius_m = radius_m;
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.max(1))
    }
}
