//! カタログファイルの読み込み

use crate::error::{KeHaritaError, Result};
use keharita_common::catalog::parse_catalog_json;
use keharita_common::{decode_catalog, CatalogLoad, FieldAliasTable};
use std::path::Path;
use tracing::info;

/// 組み込みテーブルにカスタムの別名を重ねる
pub fn alias_table(custom: Option<&Path>) -> Result<FieldAliasTable> {
    let mut table = FieldAliasTable::builtin();
    if let Some(path) = custom {
        let extra = FieldAliasTable::from_file(path)?;
        table.merge(&extra);
        info!(path = %path.display(), version = table.version, "custom aliases merged");
    }
    Ok(table)
}

/// カタログを読み込む
///
/// `[` で始まればJSON配列、それ以外はBase64（JSラッパー可）として扱う。
pub fn load_catalog(path: &Path, table: &FieldAliasTable) -> Result<CatalogLoad> {
    if !path.exists() {
        return Err(KeHaritaError::CatalogNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;

    let load = if content.trim_start().starts_with('[') {
        parse_catalog_json(&content, table)?
    } else {
        decode_catalog(&content, table)?
    };

    // 個別の警告はパース側で出している
    info!(
        points = load.points.len(),
        rejected = load.rejected.len(),
        unknown_keys = load.unknown_keys.len(),
        path = %path.display(),
        "catalog loaded"
    );
    Ok(load)
}
