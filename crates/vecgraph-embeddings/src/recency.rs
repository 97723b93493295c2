//! Recency encoding relative to "now".
//!
//! Windows end at the next UTC midnight (plus the hour offset) and reach back
//! one period. Inside a window the timestamp maps onto a quarter circle, so
//! newer items point further towards the sine axis.

use std::f64::consts::FRAC_PI_2;

use vecgraph_types::{ExecutionContext, Vector};

use crate::config::RecencyConfig;

const SECONDS_PER_DAY: i64 = 86_400;

pub fn embed(config: &RecencyConfig, created_at: i64, context: &ExecutionContext) -> Vector {
    let now = context.now();
    let expiry = next_midnight(now);
    let period_end = expiry + config.hour_offset_secs;
    let max_period = config
        .period_times
        .iter()
        .map(|p| p.period_secs)
        .max()
        .unwrap_or_default();

    let mut periods = config.period_times.clone();
    periods.sort_by_key(|p| p.period_secs);

    let mut values = Vec::with_capacity(config.length());
    let mut filter_indices = Vec::new();
    let mut filter_written = false;
    for period in &periods {
        let period_start = expiry - period.period_secs + config.hour_offset_secs;
        let in_scope = (period_start..=period_end).contains(&created_at);
        if in_scope {
            let elapsed = (created_at - period_start) as f64 / (period_end - period_start) as f64;
            let angle = elapsed * FRAC_PI_2;
            values.push((angle.cos() * f64::from(period.weight)) as f32);
            values.push((angle.sin() * f64::from(period.weight)) as f32);
        } else {
            values.push(0.0);
            values.push(0.0);
        }
        if period.period_secs == max_period && !filter_written {
            let z = if context.is_query_context() {
                1.0
            } else if in_scope {
                0.0
            } else {
                config.negative_filter
            };
            filter_indices.push(values.len());
            values.push(z);
            filter_written = true;
        }
    }
    Vector::with_negative_filter_indices(values, filter_indices)
}

fn next_midnight(now: i64) -> i64 {
    now.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY + SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeriodTime;

    // 2024-01-01T12:00:00Z
    const NOW: i64 = 1_704_110_400;

    fn config() -> RecencyConfig {
        RecencyConfig::new([PeriodTime::days(1), PeriodTime::days(10)]).with_negative_filter(-1.0)
    }

    #[test]
    fn test_length_and_filter_slot() {
        let v = embed(&config(), NOW, &ExecutionContext::online().with_fixed_now(NOW));
        assert_eq!(v.dimension(), 5);
        assert!(v.is_negative_filter(4));
        assert_eq!(v.values()[4], 0.0);
    }

    #[test]
    fn test_newer_scores_higher() {
        let ctx = ExecutionContext::online().with_fixed_now(NOW);
        let query = embed(&config(), NOW, &ExecutionContext::query().with_fixed_now(NOW));
        let recent = embed(&config(), NOW - 3600, &ctx);
        let older = embed(&config(), NOW - 5 * SECONDS_PER_DAY, &ctx);
        let score = |v: &Vector| -> f32 {
            query
                .values()
                .iter()
                .zip(v.values())
                .take(4)
                .map(|(a, b)| a * b)
                .sum()
        };
        assert!(score(&recent) > score(&older));
    }

    #[test]
    fn test_out_of_scope() {
        let ctx = ExecutionContext::online().with_fixed_now(NOW);
        let v = embed(&config(), NOW - 30 * SECONDS_PER_DAY, &ctx);
        assert_eq!(v.values(), &[0.0, 0.0, 0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_query_marker() {
        let v = embed(&config(), NOW, &ExecutionContext::query().with_fixed_now(NOW));
        assert_eq!(v.values()[4], 1.0);
    }
}
