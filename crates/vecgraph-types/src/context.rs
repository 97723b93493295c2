//! Per-evaluation settings passed through every node.

use std::collections::HashMap;

use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEnvironment {
    Online,
    Query,
}

/// Where `now` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowStrategy {
    SystemTime,
    /// Unix seconds.
    Fixed(i64),
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    environment: ExecutionEnvironment,
    now_strategy: NowStrategy,
    node_weights: HashMap<String, f32>,
    queried_schema_name: Option<String>,
}

impl ExecutionContext {
    pub fn online() -> Self {
        Self::new(ExecutionEnvironment::Online)
    }

    pub fn query() -> Self {
        Self::new(ExecutionEnvironment::Query)
    }

    fn new(environment: ExecutionEnvironment) -> Self {
        Self {
            environment,
            now_strategy: NowStrategy::SystemTime,
            node_weights: HashMap::new(),
            queried_schema_name: None,
        }
    }

    pub fn with_now(mut self, now: NowStrategy) -> Self {
        self.now_strategy = now;
        self
    }

    pub fn with_fixed_now(self, timestamp: i64) -> Self {
        self.with_now(NowStrategy::Fixed(timestamp))
    }

    pub fn with_node_weight(mut self, node_id: impl Into<String>, weight: f32) -> Self {
        self.node_weights.insert(node_id.into(), weight);
        self
    }

    pub fn with_node_weights(mut self, weights: HashMap<String, f32>) -> Self {
        self.node_weights.extend(weights);
        self
    }

    pub fn with_queried_schema(mut self, schema: impl Into<String>) -> Self {
        self.queried_schema_name = Some(schema.into());
        self
    }

    pub fn environment(&self) -> ExecutionEnvironment {
        self.environment
    }

    pub fn is_query_context(&self) -> bool {
        self.environment == ExecutionEnvironment::Query
    }

    /// Current time in unix seconds.
    pub fn now(&self) -> i64 {
        match self.now_strategy {
            NowStrategy::SystemTime => Utc::now().timestamp(),
            NowStrategy::Fixed(ts) => ts,
        }
    }

    /// Weight of a node; 1.0 unless set.
    pub fn node_weight(&self, node_id: &str) -> f32 {
        self.node_weights.get(node_id).copied().unwrap_or(1.0)
    }

    pub fn queried_schema_name(&self) -> Option<&str> {
        self.queried_schema_name.as_deref()
    }
}
