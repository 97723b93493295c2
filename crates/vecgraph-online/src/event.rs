//! Event bookkeeping and blending of new events into stored aggregates.

use std::sync::Arc;

use vecgraph_graph::EffectModifier;
use vecgraph_storage::EntityId;
use vecgraph_types::{AggregationKind, Value, Vector, Weighted};

use crate::decay::DecayStrategy;
use crate::entity_cache::EntityCache;
use crate::error::{OnlineError, Result};

pub const EFFECT_COUNT_KEY: &str = "effect_count";
pub const EFFECT_AVG_TS_KEY: &str = "effect_avg_ts";
pub const EFFECT_OLDEST_TS_KEY: &str = "effect_oldest_ts";

/// What is known about the events already folded into one aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMetadata {
    pub effect_count: i64,
    /// Mean creation time, rounded up
    pub effect_avg_ts: i64,
    pub effect_oldest_ts: i64,
}

impl EventMetadata {
    /// Fold `new_effects` weights of an event created at `created_at` into the metadata.
    pub fn recalculate(&self, created_at: i64, new_effects: i64) -> EventMetadata {
        let effect_count = self.effect_count + new_effects;
        let effect_avg_ts = if (self.effect_avg_ts != 0 && new_effects == 0) || effect_count == 0 {
            self.effect_avg_ts
        } else {
            let total = self.effect_avg_ts as i128 * (effect_count - new_effects) as i128
                + created_at as i128 * new_effects as i128;
            div_ceil(total, effect_count as i128) as i64
        };
        let effect_oldest_ts = if self.effect_oldest_ts != 0 {
            self.effect_oldest_ts.min(created_at)
        } else {
            created_at
        };
        EventMetadata {
            effect_count,
            effect_avg_ts,
            effect_oldest_ts,
        }
    }
}

fn div_ceil(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 && (numerator > 0) == (denominator > 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// Reads and writes event metadata stored next to an event-aggregation node result.
#[derive(Debug, Clone)]
pub struct EventMetadataHandler {
    node_id: String,
}

impl EventMetadataHandler {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    pub fn field_name(&self, key: &str) -> String {
        format!("{}.{key}", self.node_id)
    }

    pub fn read(&self, cache: &EntityCache<'_>, entity: &EntityId) -> Result<EventMetadata> {
        let item = |key: &str| -> Result<i64> {
            match cache.get(entity, &self.field_name(key))? {
                None => Ok(0),
                Some(Value::Int(value)) => Ok(value),
                Some(other) => Err(OnlineError::InvalidState(format!(
                    "{key} of {entity} must be an int, got {}",
                    other.type_name()
                ))),
            }
        };
        Ok(EventMetadata {
            effect_count: item(EFFECT_COUNT_KEY)?,
            effect_avg_ts: item(EFFECT_AVG_TS_KEY)?,
            effect_oldest_ts: item(EFFECT_OLDEST_TS_KEY)?,
        })
    }

    pub fn write(&self, cache: &EntityCache<'_>, entity: &EntityId, metadata: &EventMetadata) {
        for (key, value) in [
            (EFFECT_COUNT_KEY, metadata.effect_count),
            (EFFECT_AVG_TS_KEY, metadata.effect_avg_ts),
            (EFFECT_OLDEST_TS_KEY, metadata.effect_oldest_ts),
        ] {
            cache.set(entity, self.field_name(key), Value::Int(value));
        }
    }
}

/// Blends one event's affecting vector into the stored aggregate.
///
/// No normalization happens here; the aggregation node downstream normalizes.
#[derive(Debug, Clone)]
pub struct EventAggregator {
    aggregation: AggregationKind,
    modifier: EffectModifier,
    decay: Arc<dyn DecayStrategy>,
}

impl EventAggregator {
    pub fn new(aggregation: AggregationKind, modifier: EffectModifier, decay: Arc<dyn DecayStrategy>) -> Self {
        Self {
            aggregation,
            modifier,
            decay,
        }
    }

    pub fn modifier(&self) -> &EffectModifier {
        &self.modifier
    }

    /// New events count with `temperature`; the stored aggregate with its
    /// decayed weight times `(count - 1) * (1 - temperature)`. Weights are
    /// L1-normalized before aggregating.
    pub fn calculate_event_vector(
        &self,
        now: i64,
        stored: &Vector,
        affecting: Weighted<&Vector>,
        metadata: &EventMetadata,
    ) -> Result<Vector> {
        let aggregated_affecting = self
            .aggregation
            .aggregate(&[Weighted::new(affecting.item.clone(), affecting.weight)])?;
        let stored_weight = self.decay.time_modifier(now, metadata, &self.modifier)
            * (metadata.effect_count - 1) as f32
            * (1.0 - self.modifier.temperature);
        let candidates: Vec<Weighted<Vector>> = [
            Weighted::new(aggregated_affecting, self.modifier.temperature),
            Weighted::new(stored.clone(), stored_weight),
        ]
        .into_iter()
        .filter(|w| !w.item.is_empty())
        .collect();
        let total: f32 = candidates.iter().map(|w| w.weight.abs()).sum();
        let normalized: Vec<Weighted<Vector>> = if total == 0.0 {
            candidates
        } else {
            candidates
                .into_iter()
                .map(|w| Weighted::new(w.item, w.weight / total))
                .collect()
        };
        Ok(self.aggregation.aggregate(&normalized)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decay::LinearDecay;
    use vecgraph_storage::{InMemoryStorage, StorageContract};

    fn aggregator(temperature: f32) -> EventAggregator {
        let modifier = EffectModifier {
            temperature,
            ..EffectModifier::default()
        };
        EventAggregator::new(AggregationKind::VectorSum, modifier, Arc::new(LinearDecay))
    }

    #[test]
    fn test_metadata_recalculation() {
        let first = EventMetadata::default().recalculate(100, 1);
        assert_eq!(
            first,
            EventMetadata {
                effect_count: 1,
                effect_avg_ts: 100,
                effect_oldest_ts: 100
            }
        );
        let second = first.recalculate(103, 1);
        assert_eq!(second.effect_count, 2);
        // (100 + 103) / 2 rounded up
        assert_eq!(second.effect_avg_ts, 102);
        assert_eq!(second.effect_oldest_ts, 100);

        let older = second.recalculate(50, 2);
        assert_eq!(older.effect_count, 4);
        assert_eq!(older.effect_oldest_ts, 50);
    }

    #[test]
    fn test_metadata_round_trip_through_cache() {
        let storage = InMemoryStorage::new();
        let handler = EventMetadataHandler::new("event_aggregation_1");
        let entity = EntityId::new("user", "u1");
        {
            let cache = EntityCache::new(&storage);
            assert_eq!(handler.read(&cache, &entity).unwrap(), EventMetadata::default());
            handler.write(&cache, &entity, &EventMetadata::default().recalculate(10, 1));
            cache.flush().unwrap();
        }
        let cache = EntityCache::new(&storage);
        let metadata = handler.read(&cache, &entity).unwrap();
        assert_eq!(metadata.effect_count, 1);
        assert_eq!(metadata.effect_avg_ts, 10);
    }

    #[test]
    fn test_metadata_rejects_non_int() {
        let storage = InMemoryStorage::new();
        let handler = EventMetadataHandler::new("n");
        storage
            .write("user", "u1", &handler.field_name(EFFECT_COUNT_KEY), Value::from("x"))
            .unwrap();
        let cache = EntityCache::new(&storage);
        assert!(handler.read(&cache, &EntityId::new("user", "u1")).is_err());
    }

    #[test]
    fn test_first_event_replaces_empty_aggregate() {
        let affecting = Vector::new(vec![0.0, 2.0]);
        let metadata = EventMetadata::default().recalculate(100, 1);
        let result = aggregator(0.5)
            .calculate_event_vector(100, &Vector::empty(), Weighted::new(&affecting, 1.0), &metadata)
            .unwrap();
        assert_eq!(result.values(), &[0.0, 2.0]);
    }

    #[test]
    fn test_second_event_blends_with_stored() {
        let stored = Vector::new(vec![1.0, 0.0]);
        let affecting = Vector::new(vec![0.0, 1.0]);
        let metadata = EventMetadata {
            effect_count: 2,
            effect_avg_ts: 100,
            effect_oldest_ts: 100,
        };
        let result = aggregator(0.5)
            .calculate_event_vector(100, &stored, Weighted::new(&affecting, 1.0), &metadata)
            .unwrap();
        // both weights 0.5 before L1 normalization
        assert_eq!(result.values(), &[0.5, 0.5]);
    }
}
