// src/decay.rs
// Temporal decay scoring: age-based decay, access-frequency boost,
// validity windows, and duration parsing. Pure functions, no side effects.

use crate::error::{EngramError, Result};
use crate::types::{Memory, ScoredMemory};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::Deserialize;

/// Default decay half-life: one week.
pub const DEFAULT_HALF_LIFE_HOURS: f32 = 168.0;

/// Decay multiplier never drops below this floor - old memories fade,
/// they don't disappear from ranking entirely.
pub const DEFAULT_DECAY_FLOOR: f32 = 0.1;

/// Additive boost per recorded access.
pub const DEFAULT_ACCESS_BOOST: f32 = 0.05;

/// Cap on the cumulative access boost.
pub const DEFAULT_ACCESS_BOOST_CAP: f32 = 0.3;

/// Configuration for temporal scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// When false, semantic scores pass through unchanged (decay and boost
    /// are still computed for diagnostics but not applied).
    pub enabled: bool,
    /// Hours after which the decay multiplier reaches 0.5.
    pub half_life_hours: f32,
    /// Minimum decay multiplier.
    pub floor: f32,
    /// Additive boost per access.
    pub access_boost: f32,
    /// Maximum cumulative access boost.
    pub access_boost_cap: f32,
    /// Drop results whose validity window excludes the query time.
    pub filter_expired: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_hours: DEFAULT_HALF_LIFE_HOURS,
            floor: DEFAULT_DECAY_FLOOR,
            access_boost: DEFAULT_ACCESS_BOOST,
            access_boost_cap: DEFAULT_ACCESS_BOOST_CAP,
            filter_expired: true,
        }
    }
}

/// Exponential half-life decay.
///
/// Returns 1.0 for non-positive elapsed time, otherwise
/// `max(floor, 0.5^(hours / half_life))`. Strictly non-increasing in
/// `hours_elapsed` down to the floor.
pub fn exponential_decay(hours_elapsed: f32, half_life_hours: f32, floor: f32) -> f32 {
    if hours_elapsed <= 0.0 {
        return 1.0;
    }
    let decayed = 0.5_f32.powf(hours_elapsed / half_life_hours);
    decayed.max(floor)
}

/// Linear decay from 1.0 at zero hours to `floor` at `max_hours`,
/// clamped to `floor` beyond.
pub fn linear_decay(hours_elapsed: f32, max_hours: f32, floor: f32) -> f32 {
    if hours_elapsed <= 0.0 {
        return 1.0;
    }
    if hours_elapsed >= max_hours {
        return floor;
    }
    let slope = (1.0 - floor) / max_hours;
    1.0 - slope * hours_elapsed
}

/// Additive boost from access frequency: `min(count * per_access, cap)`.
pub fn access_boost(access_count: i64, per_access: f32, cap: f32) -> f32 {
    if access_count <= 0 {
        return 0.0;
    }
    (access_count as f32 * per_access).min(cap)
}

/// Whether a validity window includes `at`.
///
/// Absent bounds are open: `(None, None)` is always valid.
pub fn is_valid_at(
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> bool {
    if let Some(from) = valid_from
        && at < from
    {
        return false;
    }
    if let Some(until) = valid_until
        && at > until
    {
        return false;
    }
    true
}

/// Full breakdown of a temporal score computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalScore {
    /// The score downstream ranking should use.
    pub final_score: f32,
    /// `semantic * decay + boost` before clamping - reported even when
    /// scoring is disabled, for diagnostics.
    pub temporal_score: f32,
    pub decay_factor: f32,
    pub access_boost: f32,
    pub is_expired: bool,
}

/// Combine a semantic similarity score with a memory's age and access
/// history.
///
/// Decay is driven by `created_at`; the boost term by `access_count`.
/// These are deliberately separate signals - recency of creation and
/// frequency of use measure different things.
///
/// Monotonicity: at equal semantic score and access count, an older
/// memory never scores higher; at equal age, a more-accessed memory
/// never scores lower.
pub fn temporal_score(
    semantic_score: f32,
    memory: &Memory,
    config: &DecayConfig,
    now: DateTime<Utc>,
) -> TemporalScore {
    let hours = (now - memory.created_at).num_seconds() as f32 / 3600.0;
    let decay_factor = exponential_decay(hours, config.half_life_hours, config.floor);
    let boost = access_boost(memory.access_count, config.access_boost, config.access_boost_cap);
    let is_expired =
        config.filter_expired && !is_valid_at(memory.valid_from, memory.valid_until, now);

    let combined = (semantic_score * decay_factor + boost).clamp(0.0, 1.0);
    let final_score = if config.enabled { combined } else { semantic_score };

    TemporalScore {
        final_score,
        temporal_score: combined,
        decay_factor,
        access_boost: boost,
        is_expired,
    }
}

/// Map every result through [`temporal_score`], dropping expired entries
/// when `filter_expired` is set.
///
/// With scoring disabled the relative order is preserved (scores pass
/// through unchanged).
pub fn apply_temporal_scoring(
    results: Vec<ScoredMemory>,
    config: &DecayConfig,
    now: DateTime<Utc>,
) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = results
        .into_iter()
        .filter_map(|mut r| {
            let ts = temporal_score(r.similarity, &r.memory, config, now);
            if ts.is_expired {
                tracing::debug!("[decay] dropping expired memory {}", r.memory.id);
                return None;
            }
            r.similarity = ts.final_score;
            r.temporal = Some(ts);
            Some(r)
        })
        .collect();

    if config.enabled {
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    scored
}

/// Parse a relative duration spec (`"7d"`, `"2w"`, `"3m"`, `"1y"`) or an
/// ISO-8601 date/datetime into an absolute instant anchored at `base`.
///
/// Months and years are calendar-aware, not fixed-length.
pub fn parse_duration(spec: &str, base: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(EngramError::InvalidInput(
            "empty duration spec".to_string(),
        ));
    }

    if let Some((count, unit)) = split_count_unit(spec) {
        return match unit {
            'd' => Ok(base + Duration::days(count)),
            'w' => Ok(base + Duration::weeks(count)),
            'm' => base
                .checked_add_months(Months::new(count as u32))
                .ok_or_else(|| EngramError::InvalidInput(format!("month overflow in '{spec}'"))),
            'y' => base
                .checked_add_months(Months::new(count as u32 * 12))
                .ok_or_else(|| EngramError::InvalidInput(format!("year overflow in '{spec}'"))),
            _ => unreachable!(),
        };
    }

    // ISO-8601 datetime, then bare date at midnight UTC
    if let Ok(dt) = DateTime::parse_from_rfc3339(spec) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(spec, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(EngramError::InvalidInput(format!(
        "unrecognized duration spec '{spec}' (expected <N>d/w/m/y or ISO-8601 date)"
    )))
}

/// Split `"<N><unit>"` where unit is one of d/w/m/y. None if the spec
/// isn't in that shape.
fn split_count_unit(spec: &str) -> Option<(i64, char)> {
    let unit = spec.chars().last()?;
    if !matches!(unit, 'd' | 'w' | 'm' | 'y') {
        return None;
    }
    let digits = &spec[..spec.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok().map(|n| (n, unit))
}

/// Sample the decay curve at `steps + 1` equally spaced points from 0 to
/// `max_hours` (default 4x the half-life). Diagnostics only, not the hot
/// path.
pub fn decay_curve(config: &DecayConfig, steps: usize, max_hours: Option<f32>) -> Vec<(f32, f32)> {
    let max = max_hours.unwrap_or(config.half_life_hours * 4.0);
    let steps = steps.max(1);
    (0..=steps)
        .map(|i| {
            let hour = max * i as f32 / steps as f32;
            (
                hour,
                exponential_decay(hour, config.half_life_hours, config.floor),
            )
        })
        .collect()
}


#[cfg(test)]
mod validity_tests {
    use super::*;

    #[test]
    fn test_open_window_always_valid() {
        assert!(is_valid_at(None, None, Utc::now()));
    }

    #[test]
    fn test_not_yet_valid() {
        let tomorrow = Utc::now() + Duration::days(1);
        assert!(!is_valid_at(Some(tomorrow), None, Utc::now()));
    }

    #[test]
    fn test_expired() {
        let yesterday = Utc::now() - Duration::days(1);
        assert!(!is_valid_at(None, Some(yesterday), Utc::now()));
    }

    #[test]
    fn test_inside_window() {
        let now = Utc::now();
        assert!(is_valid_at(
            Some(now - Duration::days(1)),
            Some(now + Duration::days(1)),
            now
        ));
    }
}
