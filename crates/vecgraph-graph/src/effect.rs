//! Event effects as seen by the graph.
//!
//! A [`DagEffect`] names which entity an event updates (affected), which
//! entity's vector it contributes (affecting) and through which event schema.
//! Effects that differ only in multiplier write to the same aggregate and are
//! therefore grouped into a [`DagEffectGroup`] and processed together.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// A reference field of an event schema resolved to the entity schema it points to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSchemaReference {
    /// Entity schema the reference points to
    pub schema: String,
    /// Field of the event schema holding the object id
    pub reference_field: String,
    pub multiplier: f32,
}

impl ResolvedSchemaReference {
    pub fn new(schema: impl Into<String>, reference_field: impl Into<String>, multiplier: f32) -> Self {
        Self {
            schema: schema.into(),
            reference_field: reference_field.into(),
            multiplier,
        }
    }

    fn key(&self) -> (&str, &str, u32) {
        (&self.schema, &self.reference_field, self.multiplier.to_bits())
    }

    fn same_target(&self, other: &Self) -> bool {
        self.schema == other.schema && self.reference_field == other.reference_field
    }
}

impl PartialEq for ResolvedSchemaReference {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ResolvedSchemaReference {}

impl Hash for ResolvedSchemaReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ResolvedSchemaReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedSchemaReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.schema
            .cmp(&other.schema)
            .then_with(|| self.reference_field.cmp(&other.reference_field))
            .then_with(|| self.multiplier.total_cmp(&other.multiplier))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DagEffect {
    pub resolved_affected: ResolvedSchemaReference,
    pub resolved_affecting: ResolvedSchemaReference,
    pub event_schema: String,
}

impl DagEffect {
    pub fn new(
        resolved_affected: ResolvedSchemaReference,
        resolved_affecting: ResolvedSchemaReference,
        event_schema: impl Into<String>,
    ) -> Result<Self> {
        if resolved_affecting.multiplier == 0.0 || !resolved_affecting.multiplier.is_finite() {
            return Err(GraphError::InvalidEffect(format!(
                "multiplier must be a non-zero finite number, got {}",
                resolved_affecting.multiplier
            )));
        }
        Ok(Self {
            resolved_affected,
            resolved_affecting,
            event_schema: event_schema.into(),
        })
    }

    /// Same affected reference, event schema and affecting target.
    pub fn is_same_effect_except_for_multiplier(&self, other: &DagEffect) -> bool {
        self.resolved_affected == other.resolved_affected
            && self.event_schema == other.event_schema
            && self.resolved_affecting.same_target(&other.resolved_affecting)
    }
}

impl fmt::Display for DagEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{} (x{}) via {}",
            self.resolved_affecting.schema,
            self.resolved_affecting.reference_field,
            self.resolved_affected.schema,
            self.resolved_affected.reference_field,
            self.resolved_affecting.multiplier,
            self.event_schema
        )
    }
}

/// Non-empty set of effects that are the same except for multiplier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DagEffectGroup {
    effects: BTreeSet<DagEffect>,
}

impl DagEffectGroup {
    pub fn new(effects: impl IntoIterator<Item = DagEffect>) -> Result<Self> {
        let effects: BTreeSet<DagEffect> = effects.into_iter().collect();
        let Some(first) = effects.iter().next() else {
            return Err(GraphError::InvalidState(
                "effect group must contain at least one effect".to_string(),
            ));
        };
        if let Some(odd) = effects
            .iter()
            .find(|e| !first.is_same_effect_except_for_multiplier(e))
        {
            return Err(GraphError::InvalidState(format!(
                "effect group mixes non-equivalent effects: {first} and {odd}"
            )));
        }
        Ok(Self { effects })
    }

    pub fn effects(&self) -> &BTreeSet<DagEffect> {
        &self.effects
    }

    /// Any member; all members agree on everything but the multiplier.
    pub fn representative(&self) -> Option<&DagEffect> {
        self.effects.iter().next()
    }

    pub fn event_schema(&self) -> Option<&str> {
        self.representative().map(|e| e.event_schema.as_str())
    }

    pub fn contains(&self, effect: &DagEffect) -> bool {
        self.effects.contains(effect)
    }

    /// Greedy partition into groups of equivalent effects.
    pub fn group_similar_effects<'a>(
        effects: impl IntoIterator<Item = &'a DagEffect>,
    ) -> Vec<DagEffectGroup> {
        let mut buckets: Vec<Vec<DagEffect>> = Vec::new();
        for effect in effects {
            match buckets
                .iter_mut()
                .find(|b| b[0].is_same_effect_except_for_multiplier(effect))
            {
                Some(bucket) => bucket.push(effect.clone()),
                None => buckets.push(vec![effect.clone()]),
            }
        }
        buckets
            .into_iter()
            .map(|effects| DagEffectGroup {
                effects: effects.into_iter().collect(),
            })
            .collect()
    }
}

/// Decay and blending parameters shared by every effect of an index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectModifier {
    /// Events older than this contribute nothing
    pub max_age_secs: Option<i64>,
    /// Cap on the number of events applied per aggregate
    pub max_count: Option<i64>,
    pub temperature: f32,
    pub event_influence: f32,
    pub time_decay_floor: f32,
}

impl Default for EffectModifier {
    fn default() -> Self {
        Self {
            max_age_secs: None,
            max_count: None,
            temperature: 0.5,
            event_influence: 0.5,
            time_decay_floor: 1.0,
        }
    }
}

impl EffectModifier {
    pub fn new(
        max_age_secs: Option<i64>,
        max_count: Option<i64>,
        temperature: f32,
        event_influence: f32,
        time_decay_floor: f32,
    ) -> Result<Self> {
        let modifier = Self {
            max_age_secs,
            max_count,
            temperature,
            event_influence,
            time_decay_floor,
        };
        modifier.validate()?;
        Ok(modifier)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(max_age) = self.max_age_secs {
            if max_age <= 0 {
                return Err(GraphError::InvalidModifier(format!(
                    "max_age must be positive, got {max_age}"
                )));
            }
        }
        if let Some(max_count) = self.max_count {
            if max_count < 0 {
                return Err(GraphError::InvalidModifier(format!(
                    "max_count must not be negative, got {max_count}"
                )));
            }
        }
        for (name, value) in [
            ("temperature", self.temperature),
            ("event_influence", self.event_influence),
            ("time_decay_floor", self.time_decay_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GraphError::InvalidModifier(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(affecting_schema: &str, multiplier: f32) -> DagEffect {
        DagEffect::new(
            ResolvedSchemaReference::new("user", "user", 1.0),
            ResolvedSchemaReference::new(affecting_schema, "item", multiplier),
            "interaction",
        )
        .unwrap()
    }

    #[test]
    fn test_zero_multiplier_rejected() {
        let err = DagEffect::new(
            ResolvedSchemaReference::new("user", "user", 1.0),
            ResolvedSchemaReference::new("post", "post", 0.0),
            "interaction",
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidEffect(_)));
    }

    #[test]
    fn test_grouping_by_multiplier() {
        let effects = [effect("post", 1.0), effect("post", 2.0), effect("ad", 1.0)];
        let groups = DagEffectGroup::group_similar_effects(effects.iter());
        assert_eq!(groups.len(), 2);
        let post_group = groups
            .iter()
            .find(|g| g.contains(&effects[0]))
            .unwrap();
        assert!(post_group.contains(&effects[1]));
        assert!(!post_group.contains(&effects[2]));
    }

    #[test]
    fn test_group_rejects_mixed_effects() {
        assert!(DagEffectGroup::new([effect("post", 1.0), effect("ad", 1.0)]).is_err());
        assert!(DagEffectGroup::new([]).is_err());
        assert!(DagEffectGroup::new([effect("post", 1.0), effect("post", -1.0)]).is_ok());
    }

    #[test]
    fn test_effect_equality_uses_multiplier() {
        assert_eq!(effect("post", 1.0), effect("post", 1.0));
        assert_ne!(effect("post", 1.0), effect("post", 2.0));
        assert!(effect("post", 1.0).is_same_effect_except_for_multiplier(&effect("post", 2.0)));
    }

    #[test]
    fn test_modifier_ranges() {
        assert!(EffectModifier::new(None, None, 1.5, 0.5, 1.0).is_err());
        assert!(EffectModifier::new(None, None, 0.5, -0.1, 1.0).is_err());
        assert!(EffectModifier::new(Some(0), None, 0.5, 0.5, 1.0).is_err());
        assert!(EffectModifier::new(None, Some(-1), 0.5, 0.5, 1.0).is_err());
        assert!(EffectModifier::new(None, None, 0.5, 0.5, 1.1).is_err());
        assert!(EffectModifier::new(Some(3600), Some(0), 0.0, 1.0, 0.0).is_ok());
        assert!(EffectModifier::default().validate().is_ok());
    }
}
