//! KE Harita Common Library
//!
//! KE（Kültür Envanteri）カタログとWikidataの照合ロジック。I/Oを持たない部分を集約する。

pub mod types;
pub mod geo;
pub mod alias;
pub mod error;
pub mod catalog;
pub mod reconcile;
pub mod ranking;
pub mod sparql;
pub mod activity;

pub use types::{
    CandidateEntity, CatalogPoint, DecisionKind, EntityMetadata, MatchDecision, NewItemReport,
    PointStatus, SearchHit, UserIdentity, UserStats,
};
pub use geo::{haversine_km, parse_coordinate_text, parse_wkt_point, Coordinate, EARTH_RADIUS_KM};
pub use alias::{FieldAliasTable, ALIAS_TABLE_VERSION};
pub use error::{Error, Result};
pub use catalog::{decode_catalog, Catalog, CatalogLoad};
pub use reconcile::{reconcile, reconcile_catalog, Collection, ReconcileReport, RemoteSnapshot, SnapshotUpdate, StatusCounts};
pub use ranking::{nearest_unmatched, rank_candidates, rank_from, NextPoint};
pub use sparql::{normalize_qid, AroundQuery, CategoryFilter};
pub use activity::{leaderboard, recent_activity, time_ago, ActivityEntry};
