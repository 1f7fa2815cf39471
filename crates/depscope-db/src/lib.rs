//! # depscope-db
//!
//! PostgreSQL storage layer for depscope.
//!
//! This crate provides:
//! - Connection pool management
//! - The component/metadata repository (tiered JSONB bags)
//! - The at-least-once work queue (visibility timeouts, dequeue counts)
//! - The TTL'd dedup cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use depscope_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/depscope").await?;
//!     db.migrate().await?;
//!
//!     let component = db.components.ensure("pkg:npm/chalk").await?;
//!     println!("Tracking {}", component.purl);
//!     Ok(())
//! }
//! ```

pub mod components;
pub mod dedup;
pub mod pool;
pub mod queue;

// Re-export core types
pub use depscope_core::*;

pub use components::PgComponentRepository;
pub use dedup::PgDedupCache;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use queue::PgWorkQueue;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::PgPool,
    /// Component repository (metadata store).
    pub components: PgComponentRepository,
    /// Dedup cache for in-flight job requests.
    pub dedup: PgDedupCache,
}

impl Database {
    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self {
            components: PgComponentRepository::new(pool.clone()),
            dedup: PgDedupCache::new(pool.clone()),
            pool,
        }
    }

    /// Apply embedded schema migrations (idempotent).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// A handle to one logical work queue.
    pub fn work_queue(&self, name: impl Into<String>) -> PgWorkQueue {
        PgWorkQueue::new(self.pool.clone(), name)
    }
}
