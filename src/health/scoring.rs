//! Latency and reachability to health score.

/// Credit for any successful connection.
const BASE_SCORE: f64 = 50.0;

/// Upper latency bound (inclusive, ms) and the bonus it earns.
const LATENCY_TIERS: [(u64, f64); 4] = [(50, 50.0), (100, 40.0), (200, 30.0), (500, 20.0)];

/// Bonus for anything slower than the last tier.
const SLOW_BONUS: f64 = 10.0;

/// Compute a health score in `[0, 100]`.
///
/// Fails closed: an unsuccessful probe or a missing latency scores 0.
pub fn score(latency_ms: Option<u64>, succeeded: bool) -> f64 {
    let latency = match latency_ms {
        Some(latency) if succeeded => latency,
        _ => return 0.0,
    };

    let bonus = LATENCY_TIERS
        .iter()
        .find(|(limit, _)| latency <= *limit)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(SLOW_BONUS);

    (BASE_SCORE + bonus).min(100.0)
}
