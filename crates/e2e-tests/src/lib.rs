//! End-to-end test infrastructure for vecgraph.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full ingest-to-query pipeline.

use std::sync::Arc;

use vecgraph_embeddings::{
    EmbeddingConfig, EngineRegistry, MockEmbeddingEngine, ModelConfig, NumberConfig, NumberMode,
    TransformationConfig,
};
use vecgraph_graph::{Effect, Index, IndexBuilder, Space};
use vecgraph_online::{EventRecord, ParsedRecord};
use vecgraph_service::{open_storage, App};
use vecgraph_storage::SearchAlgorithm;
use vecgraph_types::{Schema, SchemaField, Settings, StorageBackend, Value, Vector};

/// Dimension of the mock text engine used by every harness.
pub const TEXT_DIMENSION: usize = 8;

/// Shared test harness for E2E tests.
///
/// Owns a temp directory for RocksDB backed runs and the app under test.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub settings: Settings,
    /// Counts embedding calls made by the app
    pub engine: Arc<MockEmbeddingEngine>,
    pub app: App,
}

impl TestHarness {
    /// In-memory harness with default settings.
    pub fn new(index: Index) -> Self {
        Self::with_settings(index, Settings::default())
    }

    /// Harness whose storage lives in RocksDB inside the temp directory.
    pub fn with_rocksdb(index: Index) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::RocksDb;
        settings.storage.db_path = temp_dir.path().join("db").to_string_lossy().to_string();
        Self::build(temp_dir, index, settings, SearchAlgorithm::Flat)
    }

    pub fn with_settings(index: Index, settings: Settings) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        Self::build(temp_dir, index, settings, SearchAlgorithm::Flat)
    }

    pub fn with_search_algorithm(index: Index, algorithm: SearchAlgorithm) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        Self::build(temp_dir, index, Settings::default(), algorithm)
    }

    fn build(temp_dir: tempfile::TempDir, index: Index, settings: Settings, algorithm: SearchAlgorithm) -> Self {
        let engine = Arc::new(MockEmbeddingEngine::new("mock", TEXT_DIMENSION));
        let app = open_app(index, engine.clone(), &settings, algorithm);
        Self {
            _temp_dir: temp_dir,
            settings,
            engine,
            app,
        }
    }

    /// Drop the app and open a new one over the same storage location.
    ///
    /// Only meaningful for RocksDB harnesses.
    pub fn reopen(self, index: Index) -> Self {
        let Self {
            _temp_dir,
            settings,
            app,
            ..
        } = self;
        drop(app);
        Self::build(_temp_dir, index, settings, SearchAlgorithm::Flat)
    }

    /// The stored index vector of an entity.
    pub fn index_vector(&self, schema: &str, object_id: &str) -> Vector {
        let field = self.app.index().index_node_id().to_string();
        let mut stored = self
            .app
            .storage()
            .read(schema, object_id, &[field.clone()])
            .expect("Failed to read entity");
        match stored.remove(&field) {
            Some(Value::Vector(vector)) => vector,
            other => panic!("No index vector for {schema}:{object_id}: {other:?}"),
        }
    }
}

fn open_app(
    index: Index,
    engine: Arc<MockEmbeddingEngine>,
    settings: &Settings,
    algorithm: SearchAlgorithm,
) -> App {
    let storage = open_storage(settings).expect("Failed to open test storage");
    let engines = EngineRegistry::new().with_engine(engine);
    let app = App::new(index, engines, storage, settings.clone())
        .expect("Failed to create app")
        .with_search_algorithm(algorithm);
    app.init_search_indices(false)
        .expect("Failed to init search indices");
    app
}

fn text_space(name: &str, fields: impl IntoIterator<Item = SchemaField>) -> Space {
    Space::new(
        name,
        TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension: TEXT_DIMENSION,
        })),
        fields,
    )
    .expect("Failed to create text space")
}

/// Papers with a text `body` space and a `year` space favouring recent years.
///
/// `year` and `title` are stored and filterable.
pub fn paper_index() -> Index {
    let paper = Schema::entity("paper");
    let year = Space::new(
        "year",
        TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
            2000.0,
            2025.0,
            NumberMode::Maximum,
        ))),
        [paper.field("year")],
    )
    .expect("Failed to create number space");
    IndexBuilder::new([text_space("body", [paper.field("body")]), year])
        .with_stored_fields([paper.field("year"), paper.field("title")])
        .build()
        .expect("Failed to build paper index")
}

/// Papers with two text spaces, `body` and `title`.
pub fn two_text_index() -> Index {
    let paper = Schema::entity("paper");
    IndexBuilder::new([
        text_space("body", [paper.field("body")]),
        text_space("title", [paper.field("title")]),
    ])
    .with_stored_fields([paper.field("title")])
    .build()
    .expect("Failed to build two text index")
}

/// Users and posts sharing one text space; `like` events pull users towards posts.
pub fn social_index() -> Index {
    let user = Schema::entity("user");
    let post = Schema::entity("post");
    let like = Schema::event("like");
    IndexBuilder::new([text_space("text", [user.field("bio"), post.field("body")])])
        .with_effects([Effect::new(
            "text",
            like.reference("user", &user),
            like.reference("post", &post),
        )])
        .build()
        .expect("Failed to build social index")
}

pub fn paper(id: &str, title: &str, body: &str, year: i64) -> ParsedRecord {
    ParsedRecord::new("paper", id)
        .with_field("title", title)
        .with_field("body", body)
        .with_field("year", Value::Int(year))
}

/// Three papers on unrelated topics.
pub fn papers() -> Vec<ParsedRecord> {
    vec![
        paper("p1", "Graphs", "graph engines for vectors", 2010),
        paper("p2", "Kernels", "operating system kernels", 2020),
        paper("p3", "Indexes", "approximate nearest neighbour indexes", 2024),
    ]
}

/// `count` papers with distinct bodies, for concurrency and volume tests.
pub fn many_papers(count: usize) -> Vec<ParsedRecord> {
    (0..count)
        .map(|i| {
            paper(
                &format!("p{i}"),
                &format!("Paper {i}"),
                &format!("topic{} topic{} shared words", i % 7, i % 11),
                2000 + (i % 26) as i64,
            )
        })
        .collect()
}

pub fn user(id: &str, bio: &str) -> ParsedRecord {
    ParsedRecord::new("user", id).with_field("bio", bio)
}

pub fn post(id: &str, body: &str) -> ParsedRecord {
    ParsedRecord::new("post", id).with_field("body", body)
}

/// A like event created now.
pub fn like(event_id: &str, user: &str, post: &str) -> EventRecord {
    EventRecord::new("like", event_id, chrono::Utc::now().timestamp())
        .with_field("user", user)
        .with_field("post", post)
}
