//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, StorageError, StorageResult};
use crate::search::{
    QueryPlanner, ReferenceResolver, SearchParameterDefinition, SearchParameterExtractor,
    SearchParameterRegistry,
};

use super::schema;
use super::search::SqliteSearchIndexWriter;

/// SQLite backend for clinical resource storage.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
    /// Search parameter registry shared by the extractor, resolver and planner.
    search_registry: Arc<RwLock<SearchParameterRegistry>>,
    search_extractor: Arc<SearchParameterExtractor>,
    reference_resolver: ReferenceResolver,
    query_planner: QueryPlanner,
    index_writer: SqliteSearchIndexWriter,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("search_registry_len", &self.search_registry.read().len())
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Page size when a search gives no `_count`.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound for `_count`.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Batch size for re-index jobs that don't set their own.
    #[serde(default = "default_reindex_batch_size")]
    pub reindex_batch_size: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_reindex_batch_size() -> u32 {
    100
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            reindex_batch_size: default_reindex_batch_size(),
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend with its schema initialized.
    ///
    /// Every backend gets its own uniquely named shared-cache database, so
    /// pooled connections see the same data and separate backends stay
    /// isolated.
    pub fn in_memory() -> StorageResult<Self> {
        Self::in_memory_with_config(SqliteBackendConfig::default())
    }

    /// Creates an in-memory backend with custom configuration.
    ///
    /// The pool is capped at one connection; shared-cache databases report
    /// table locks instead of waiting on them.
    pub fn in_memory_with_config(mut config: SqliteBackendConfig) -> StorageResult<Self> {
        config.max_connections = 1;
        config.min_connections = 1;
        let uri = format!(
            "file:helios-mem-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let backend = Self::build(&uri, config, true)?;
        backend.init_schema()?;
        Ok(backend)
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Opens a file database with custom configuration and initializes its
    /// schema.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteBackendConfig) -> StorageResult<Self> {
        let path_str = path.as_ref().to_string_lossy().into_owned();
        let backend = Self::build(&path_str, config, false)?;
        backend.init_schema()?;
        Ok(backend)
    }

    fn build(location: &str, config: SqliteBackendConfig, is_memory: bool) -> StorageResult<Self> {
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let manager = SqliteConnectionManager::file(location)
            .with_flags(flags)
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")
            });

        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(config.min_connections.max(1)))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        let search_registry = Arc::new(RwLock::new(SearchParameterRegistry::with_standard_params()));
        tracing::info!(
            parameters = search_registry.read().len(),
            "loaded standard search parameters"
        );
        let search_extractor = Arc::new(SearchParameterExtractor::new(search_registry.clone()));
        let reference_resolver =
            ReferenceResolver::new(search_registry.clone(), search_extractor.clone());
        let query_planner = QueryPlanner::new(
            search_registry.clone(),
            config.default_page_size,
            config.max_page_size,
        );

        let backend = Self {
            pool,
            config,
            is_memory,
            search_registry,
            search_extractor,
            reference_resolver,
            query_planner,
            index_writer: SqliteSearchIndexWriter::new(),
        };

        backend.configure_connection()?;
        tracing::info!(location, is_memory, "opened sqlite backend");

        Ok(backend)
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(&self) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Database-wide settings that persist beyond one connection.
    fn configure_connection(&self) -> StorageResult<()> {
        if self.config.enable_wal && !self.is_memory {
            let conn = self.get_connection()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;").map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "sqlite".to_string(),
                    message: format!("Failed to enable WAL mode: {}", e),
                    source: None,
                })
            })?;
        }
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Returns a reference to the search parameter registry.
    pub fn search_registry(&self) -> &Arc<RwLock<SearchParameterRegistry>> {
        &self.search_registry
    }

    /// Returns a reference to the search parameter extractor.
    pub fn search_extractor(&self) -> &Arc<SearchParameterExtractor> {
        &self.search_extractor
    }

    pub(crate) fn reference_resolver(&self) -> &ReferenceResolver {
        &self.reference_resolver
    }

    pub(crate) fn query_planner(&self) -> &QueryPlanner {
        &self.query_planner
    }

    pub(crate) fn index_writer(&self) -> &SqliteSearchIndexWriter {
        &self.index_writer
    }

    /// Registers a search parameter at runtime.
    ///
    /// Resources written afterwards are indexed for it; existing resources
    /// need a re-index.
    pub fn register_search_parameter(&self, definition: SearchParameterDefinition) -> StorageResult<()> {
        let code = definition.code.clone();
        self.search_registry.write().register(definition).map_err(|e| {
            StorageError::Validation(crate::error::ValidationError::InvalidSearchParameter {
                name: code.clone(),
                message: e.to_string(),
            })
        })?;
        tracing::info!(param = %code, "registered search parameter");
        Ok(())
    }
}
