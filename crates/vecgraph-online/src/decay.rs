//! Temporal decay of previously aggregated events.

use std::fmt;

use vecgraph_graph::EffectModifier;

use crate::event::EventMetadata;

/// Weight of an event aggregate given how old its events are on average.
///
/// Implementations must not increase with age and must stay at or above
/// `time_decay_floor` while the aggregate is within `max_age`.
pub trait DecayStrategy: Send + Sync + fmt::Debug {
    fn time_modifier(&self, now: i64, metadata: &EventMetadata, modifier: &EffectModifier) -> f32;
}

/// Linear decay from 1 at age 0 down to the floor at `max_age`.
///
/// Without `max_age` the span between now and the oldest event is used.
/// Aggregates whose mean age is beyond the span get 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDecay;

impl DecayStrategy for LinearDecay {
    fn time_modifier(&self, now: i64, metadata: &EventMetadata, modifier: &EffectModifier) -> f32 {
        let span = modifier
            .max_age_secs
            .unwrap_or(now - metadata.effect_oldest_ts);
        if span == 0 {
            return 1.0;
        }
        let mean_age = now - metadata.effect_avg_ts;
        if span < mean_age {
            return 0.0;
        }
        let normalized_age = mean_age as f32 / span as f32;
        let floor = modifier.time_decay_floor;
        (1.0 - normalized_age) * (1.0 - floor) + floor
    }
}
