//! 距離による並べ替えと次の未照合地点の選択

use crate::geo::{haversine_km, Coordinate};
use crate::types::{CandidateEntity, CatalogPoint};
use serde::Serialize;

/// 距離の昇順に並べ替え（同距離はクエリ順を維持）
pub fn rank_candidates(candidates: &mut [CandidateEntity]) {
    candidates.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
}

/// 基準点からの距離を付けて並べ替える
pub fn rank_from(reference: &Coordinate, mut candidates: Vec<CandidateEntity>) -> Vec<CandidateEntity> {
    for c in candidates.iter_mut() {
        c.distance_m = reference.distance_m(&c.coordinate);
    }
    rank_candidates(&mut candidates);
    candidates
}

/// 次に提示する地点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NextPoint {
    Found {
        point: CatalogPoint,
        distance_km: f64,
    },
    /// 未照合が残っていない（終了状態）
    AllResolved,
}

impl NextPoint {
    pub fn point(&self) -> Option<&CatalogPoint> {
        match self {
            NextPoint::Found { point, .. } => Some(point),
            NextPoint::AllResolved => None,
        }
    }
}

/// 最寄りの未照合地点を線形探索で選ぶ
///
/// 同距離の場合はカタログ順で最初のもの。
pub fn nearest_unmatched<'a, I>(points: I, from: &Coordinate) -> NextPoint
where
    I: IntoIterator<Item = &'a CatalogPoint>,
{
    let mut best: Option<(&CatalogPoint, f64)> = None;

    for point in points.into_iter().filter(|p| p.is_unmatched()) {
        let d = haversine_km(from, &point.coordinate);
        match best {
            Some((_, min)) if d >= min => {}
            _ => best = Some((point, d)),
        }
    }

    match best {
        Some((point, distance_km)) => NextPoint::Found {
            point: point.clone(),
            distance_km,
        },
        None => NextPoint::AllResolved,
    }
}
