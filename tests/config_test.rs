//! 設定ファイルテスト

use keharita_rust::config::{Config, DEFAULT_SEARCH_RADIUS_M};
use keharita_rust::error::KeHaritaError;
use tempfile::tempdir;

/// ファイルがなければ既定値
#[test]
fn test_load_missing_file_returns_default() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = Config::load_from(&dir.path().join("config.json")).unwrap();

    assert_eq!(config.search_radius_m, DEFAULT_SEARCH_RADIUS_M);
    assert_eq!(config.language, "tr,en");
    assert!(config.user_name.is_none());
    assert!(config.enrich_categories);
}

/// 保存と読み込み
#[test]
fn test_save_and_load() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    let identity = config.set_user("Mehmet Öz", 1_712_345_678_901).unwrap();
    config.set_search_radius(250.0).unwrap();
    config.store_url = Some("https://ke-harita.firebaseio.com".into());
    config.save_to(&path).expect("設定保存失敗");

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.user_name.as_deref(), Some("Mehmet Öz"));
    assert_eq!(loaded.user_id.as_deref(), Some(identity.user_id.as_str()));
    assert_eq!(identity.user_id, "user_mehmet_öz_678901");
    assert_eq!(loaded.search_radius_m, 250.0);
    assert_eq!(loaded.store_url.as_deref(), Some("https://ke-harita.firebaseio.com"));
}

/// 欠けたフィールドは既定値で補う
#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"search_radius_m": 500}"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.search_radius_m, 500.0);
    assert_eq!(config.timeout_seconds, 30);
    assert!(config.sparql_endpoint.starts_with("https://"));
}

/// 壊れたJSONはエラー
#[test]
fn test_invalid_json() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = Config::load_from(&path);
    assert!(matches!(result, Err(KeHaritaError::JsonParse(_))));
}

/// 半径は正の値のみ
#[test]
fn test_radius_validation() {
    let mut config = Config::default();
    assert!(config.set_search_radius(0.0).is_err());
    assert!(config.set_search_radius(-10.0).is_err());
    assert!(config.set_search_radius(f64::INFINITY).is_err());
    assert_eq!(config.search_radius_m, DEFAULT_SEARCH_RADIUS_M);

    config.set_search_radius(1000.0).unwrap();
    assert_eq!(config.search_radius_m, 1000.0);
}

/// 空のユーザー名は拒否
#[test]
fn test_empty_user_rejected() {
    let mut config = Config::default();
    let err = config.set_user("   ", 1).unwrap_err();
    assert!(matches!(err, KeHaritaError::InvalidInput(_)));
    assert!(config.user_name.is_none());
}

/// タイムアウトは最低1秒
#[test]
fn test_timeout_floor() {
    let mut config = Config::default();
    config.timeout_seconds = 0;
    assert_eq!(config.timeout().as_secs(), 1);
}
