//! # docflow-db
//!
//! Document store implementations for docflow.
//!
//! This crate provides:
//! - [`InMemoryDocumentStore`] for the simulator and tests
//! - [`PgDocumentStore`] backed by PostgreSQL
//! - Connection pool management and SQL migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use docflow_db::{Database, DocType, DocumentStore, NewDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/docflow").await?;
//!     let doc = db
//!         .documents
//!         .create_document(NewDocument::new(project_id, DocType::Text, "notes.html"))
//!         .await?;
//!     println!("Created document: {}", doc.id);
//!     Ok(())
//! }
//! ```

pub mod documents;
pub mod memory;
pub mod pool;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use docflow_core::*;

pub use documents::PgDocumentStore;
pub use memory::InMemoryDocumentStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Documents and their completion vectors.
    pub documents: PgDocumentStore,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
