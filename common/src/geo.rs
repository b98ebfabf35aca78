//! 座標と距離計算
//!
//! - Coordinate: 範囲チェック済みの緯度経度
//! - haversine_km: 大圏距離（地球半径 6371 km）
//! - WKT `Point(lon lat)` と入力テキストのパース

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 地球半径 (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

lazy_static! {
    static ref WKT_POINT: Regex =
        Regex::new(r"(?i)Point\(\s*([^\s()]+)\s+([^\s()]+)\s*\)").unwrap();
    static ref COORD_SEPARATOR: Regex = Regex::new(r"[,\s/]+").unwrap();
}

/// 緯度経度（WGS84、度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// 範囲チェック付きで生成
    ///
    /// 緯度は [-90, 90]、経度は [-180, 180]。NaN/無限大は不可。
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(Error::InvalidCoordinate(format!(
                "数値ではありません: ({}, {})",
                lat, lon
            )));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidCoordinate(format!(
                "緯度 {} は -90〜90 の範囲外です",
                lat
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidCoordinate(format!(
                "経度 {} は -180〜180 の範囲外です",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// デシリアライズ後などの再検証
    pub fn validate(&self) -> Result<()> {
        Self::new(self.lat, self.lon).map(|_| ())
    }

    /// 他の座標までの距離 (km)
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        haversine_km(self, other)
    }

    /// 他の座標までの距離 (m)
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_km(self, other) * 1000.0
    }

    /// SPARQL用 WKT 表現（経度が先）
    pub fn to_wkt(&self) -> String {
        format!("Point({} {})", self.lon, self.lat)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

/// ハバーサイン公式による大圏距離 (km)
pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// WKTリテラル `Point(lon lat)` をパース
///
/// SPARQLの `geo:wktLiteral` は経度→緯度の順。
pub fn parse_wkt_point(literal: &str) -> Result<Coordinate> {
    let caps = WKT_POINT
        .captures(literal)
        .ok_or_else(|| Error::Parse(format!("WKT Pointではありません: {}", literal)))?;

    let lon: f64 = caps[1]
        .parse()
        .map_err(|_| Error::Parse(format!("経度を解釈できません: {}", &caps[1])))?;
    let lat: f64 = caps[2]
        .parse()
        .map_err(|_| Error::Parse(format!("緯度を解釈できません: {}", &caps[2])))?;

    Coordinate::new(lat, lon)
}

/// 入力テキストから座標をパース
///
/// 区切りはカンマ・空白・スラッシュ。例:
/// - `41.0082, 28.9784`
/// - `41.0082 28.9784`
/// - `41.0082/28.9784`
pub fn parse_coordinate_text(input: &str) -> Result<Coordinate> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("座標が入力されていません".into()));
    }

    let parts: Vec<&str> = COORD_SEPARATOR
        .split(input)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.len() != 2 {
        return Err(Error::InvalidInput(format!(
            "座標の形式が不正です: {} (例: 41.0082, 28.9784)",
            input
        )));
    }

    let lat: f64 = parts[0]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("緯度を解釈できません: {}", parts[0])))?;
    let lon: f64 = parts[1]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("経度を解釈できません: {}", parts[1])))?;

    Coordinate::new(lat, lon)
}
