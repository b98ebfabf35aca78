//! KE Harita
//!
//! Kültür Envanteri（KE）カタログの各地点を、近傍のWikidata項目と照合する。
//! 判定はリモートストアに保存し、全クライアントが購読で同じ状態に収束する。

pub mod cli;
pub mod config;
pub mod error;
pub mod finder;
pub mod knowledge;
pub mod loader;
pub mod session;
pub mod store;
pub mod sync;

pub use error::{KeHaritaError, Result};
