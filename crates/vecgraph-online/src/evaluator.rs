//! Incremental evaluation of records and events against compiled online dags.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use vecgraph_graph::{Dag, DagEffectGroup};
use vecgraph_storage::{EntityId, StorageContract};
use vecgraph_types::ExecutionContext;

use crate::compiler::{OnlineSchemaDag, OnlineSchemaDagCompiler};
use crate::entity_cache::EntityCache;
use crate::error::{OnlineError, Result};
use crate::executor::ConcurrentExecutor;
use crate::record::{EvaluationResult, EventRecord, OnlineInput, ParsedRecord};

/// Online dag of one effect group, with the lock serializing its updates.
#[derive(Debug)]
struct GroupDag {
    group: DagEffectGroup,
    dag: OnlineSchemaDag,
    lock: Mutex<()>,
}

impl GroupDag {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held effect group locks; updates of the locked groups wait until this drops.
#[must_use = "the groups unlock as soon as the guards drop"]
#[derive(Debug)]
pub struct GroupGuards<'a> {
    guards: Vec<MutexGuard<'a, ()>>,
}

impl GroupGuards<'_> {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Evaluates record batches per schema and event batches per effect group.
#[derive(Debug)]
pub struct OnlineDagEvaluator {
    schema_dags: BTreeMap<String, OnlineSchemaDag>,
    group_dags: Vec<GroupDag>,
    executor: ConcurrentExecutor,
}

impl OnlineDagEvaluator {
    pub fn new(
        dag: &Dag,
        schemas: &BTreeSet<String>,
        mut compiler: OnlineSchemaDagCompiler,
        executor: ConcurrentExecutor,
    ) -> Result<Self> {
        let mut schema_dags = BTreeMap::new();
        for schema in schemas {
            let projected = dag.project_to_schema(schema)?;
            schema_dags.insert(schema.clone(), compiler.compile_schema_dag(&projected)?);
        }
        let mut group_dags = Vec::new();
        for group in dag.dag_effect_groups() {
            let projected = dag.project_to_dag_effect_group(&group)?;
            group_dags.push(GroupDag {
                dag: compiler.compile_schema_dag(&projected)?,
                group,
                lock: Mutex::new(()),
            });
        }
        info!(
            schemas = schema_dags.len(),
            effect_groups = group_dags.len(),
            concurrent = executor.is_enabled(),
            "Online evaluator ready"
        );
        Ok(Self {
            schema_dags,
            group_dags,
            executor,
        })
    }

    pub fn schemas(&self) -> impl Iterator<Item = &str> {
        self.schema_dags.keys().map(String::as_str)
    }

    pub fn schema_dag(&self, schema: &str) -> Option<&OnlineSchemaDag> {
        self.schema_dags.get(schema)
    }

    pub fn effect_groups(&self) -> impl Iterator<Item = &DagEffectGroup> {
        self.group_dags.iter().map(|g| &g.group)
    }

    /// Event schemas handled by at least one effect group.
    pub fn event_schemas(&self) -> BTreeSet<&str> {
        self.group_dags
            .iter()
            .filter_map(|g| g.group.event_schema())
            .collect()
    }

    /// Lock every effect group whose affected entities belong to `schemas`.
    ///
    /// Groups are always locked in the same order as in `evaluate_events`.
    /// Hold the guards across `evaluate` and the cache flush when records may
    /// be affected by concurrent events.
    pub fn lock_groups_affecting<'s>(&self, schemas: impl IntoIterator<Item = &'s str>) -> GroupGuards<'_> {
        let schemas: BTreeSet<&str> = schemas.into_iter().collect();
        let guards = self
            .group_dags
            .iter()
            .filter(|g| {
                g.group
                    .representative()
                    .is_some_and(|e| schemas.contains(e.resolved_affected.schema.as_str()))
            })
            .map(GroupDag::lock)
            .collect();
        GroupGuards { guards }
    }

    /// Evaluate records, staging persisted results in `cache`.
    ///
    /// Results are in record order. Nothing is written until the caller
    /// flushes the cache; see `lock_groups_affecting`.
    pub fn evaluate(
        &self,
        records: &[ParsedRecord],
        context: &ExecutionContext,
        cache: &EntityCache<'_>,
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let mut by_schema: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            if !self.schema_dags.contains_key(&record.schema) {
                return Err(OnlineError::UnknownSchema(record.schema.clone()));
            }
            by_schema.entry(record.schema.as_str()).or_default().push(i);
        }

        let mut output: Vec<Option<EvaluationResult>> = vec![None; records.len()];
        for (schema, positions) in by_schema {
            let dag = self
                .schema_dags
                .get(schema)
                .ok_or_else(|| OnlineError::UnknownSchema(schema.to_string()))?;
            let inputs: Vec<OnlineInput<'_>> = positions
                .iter()
                .map(|&i| OnlineInput::record(&records[i]))
                .collect();
            let results = dag.evaluate(&inputs, context, cache, &self.executor)?;
            for (position, result) in positions.into_iter().zip(results) {
                output[position] = result;
            }
            debug!(schema, records = inputs.len(), "Evaluated records");
        }
        Ok(output)
    }

    /// Apply events to the entities they affect and write the results.
    ///
    /// Touched groups are locked in a fixed order for the whole evaluation
    /// and the single flush, so updates to one aggregate never interleave.
    /// Returns the new index result per (affected entity, event) pair.
    pub fn evaluate_events(
        &self,
        events: &[EventRecord],
        context: &ExecutionContext,
        storage: &dyn StorageContract,
    ) -> Result<Vec<(EntityId, Option<EvaluationResult>)>> {
        let mut touched: Vec<(&GroupDag, Vec<OnlineInput<'_>>)> = Vec::new();
        for group_dag in &self.group_dags {
            let Some(representative) = group_dag.group.representative() else {
                continue;
            };
            let affected = &representative.resolved_affected;
            let inputs = events
                .iter()
                .filter(|e| e.schema() == representative.event_schema)
                .map(|event| {
                    let object_id = event.reference(&affected.reference_field).ok_or_else(|| {
                        OnlineError::InvalidInput(format!(
                            "event {} has no reference in {}",
                            event.event_id(),
                            affected.reference_field
                        ))
                    })?;
                    Ok(OnlineInput::event(EntityId::new(&affected.schema, object_id), event))
                })
                .collect::<Result<Vec<_>>>()?;
            if !inputs.is_empty() {
                touched.push((group_dag, inputs));
            }
        }
        if touched.is_empty() {
            warn!(events = events.len(), "No effect group handles these events");
            return Ok(Vec::new());
        }

        let _guards: Vec<_> = touched
            .iter()
            .map(|(group_dag, _)| group_dag.lock())
            .collect();
        let cache = EntityCache::new(storage);
        let mut output = Vec::new();
        for (group_dag, inputs) in &touched {
            let results = group_dag.dag.evaluate(inputs, context, &cache, &self.executor)?;
            output.extend(inputs.iter().map(OnlineInput::entity_id).zip(results));
            debug!(
                event_schema = group_dag.dag.schema(),
                effects = group_dag.group.effects().len(),
                events = inputs.len(),
                "Evaluated effect group"
            );
        }
        cache.flush()?;
        Ok(output)
    }
}
