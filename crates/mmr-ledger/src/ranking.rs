//! Phase-end placement.
//!
//! Points descending is the only comparison key. Equal points share a
//! placement; the next distinct score takes its 1-based position, so a
//! three-way tie for first is followed by 4th (no rank compression).

use crate::types::Standing;

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub coder_id: i64,
    pub points: f64,
    pub placement: i32,
}

/// Rank standings for one round. Output is in placement order.
pub fn rank(standings: &[Standing]) -> Vec<Ranked> {
    let mut entries: Vec<(i64, f64)> = standings
        .iter()
        .map(|s| (s.coder_id, s.ranking_points()))
        .collect();

    // Stable: equal scores keep their input order.
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut out: Vec<Ranked> = Vec::with_capacity(entries.len());
    for (i, (coder_id, points)) in entries.into_iter().enumerate() {
        let placement = match out.last() {
            Some(prev) if prev.points == points => prev.placement,
            _ => (i + 1) as i32,
        };
        out.push(Ranked {
            coder_id,
            points,
            placement,
        });
    }
    out
}
