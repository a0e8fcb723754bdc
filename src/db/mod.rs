mod allocation;
mod associations;
mod idempotency;
mod prefixes;
pub(crate) mod row_helpers;
mod vpcs;
mod vrfs;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::models::PUBLIC_VRF_ID;

/// Typed error for "resource not found" — enables reliable downcast
/// in the API error handler instead of fragile string matching.
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Typed domain errors. Carried through anyhow::Result and downcast at the
/// API boundary, where each variant maps to a fixed status code.
#[derive(Debug)]
pub enum IpamError {
    InvalidCidr(String),
    InvalidMaskLength(String),
    ParentMismatch(String),
    FamilyMismatch(String),
    DuplicateCidr(String),
    SiblingOverlap(String),
    AlreadyExists(String),
    ParameterMismatch(String),
    AssociationPolicy(String),
    VpcSourcedImmutable(String),
    HasChildren(String),
    ChildrenNotAllowed(String),
    PrefixInUse(String),
    VrfInUse(String),
    VpcInUse(String),
    ProtectedVrf(String),
    NoSpaceAvailable(String),
}

impl std::fmt::Display for IpamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpamError::InvalidCidr(m)
            | IpamError::InvalidMaskLength(m)
            | IpamError::ParentMismatch(m)
            | IpamError::FamilyMismatch(m)
            | IpamError::DuplicateCidr(m)
            | IpamError::SiblingOverlap(m)
            | IpamError::AlreadyExists(m)
            | IpamError::ParameterMismatch(m)
            | IpamError::AssociationPolicy(m)
            | IpamError::VpcSourcedImmutable(m)
            | IpamError::HasChildren(m)
            | IpamError::ChildrenNotAllowed(m)
            | IpamError::PrefixInUse(m)
            | IpamError::VrfInUse(m)
            | IpamError::VpcInUse(m)
            | IpamError::ProtectedVrf(m)
            | IpamError::NoSpaceAvailable(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for IpamError {}

/// True when a sqlx error is a SQLite unique-constraint violation. Concurrent
/// writers rely on this to turn insert races into typed conflicts.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            code == "1555" || code == "2067" || db.message().contains("UNIQUE constraint")
        }
        _ => false,
    }
}

/// Store handles all database operations, delegating to per-entity modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with the default pool size
    #[allow(dead_code)]
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::with_pool_size(db_path, 5).await
    }

    /// Create a new database store with a specific pool size
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations and seed the reserved public VRF
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;

        let now = Utc::now();
        sqlx::query(
            r#"INSERT OR IGNORE INTO vrfs (vrf_id, description, tags, routable_flag, is_default, created_at, updated_at)
               VALUES (?, 'Public internet addresses', '{}', 1, 0, ?, ?)"#,
        )
        .bind(PUBLIC_VRF_ID)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ensure the configured default VRF exists and is marked default.
    /// Runs once at startup; an existing default is left untouched.
    pub async fn ensure_default_vrf(&self, vrf_id: &str) -> Result<()> {
        let has_default: Option<(String,)> =
            sqlx::query_as("SELECT vrf_id FROM vrfs WHERE is_default = 1")
                .fetch_optional(&self.pool)
                .await?;
        if has_default.is_some() {
            return Ok(());
        }

        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO vrfs (vrf_id, description, tags, routable_flag, is_default, created_at, updated_at)
               VALUES (?, 'Default routing domain', '{}', 1, 1, ?, ?)
               ON CONFLICT (vrf_id) DO UPDATE SET is_default = 1"#,
        )
        .bind(vrf_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!("Default VRF ensured: {}", vrf_id);
        Ok(())
    }
}
