//! Component repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use depscope_core::{
    Component, ComponentRepository, Error, MetadataBag, MetadataRecord, MetadataTier, PackageUrl,
    Result,
};

/// PostgreSQL implementation of [`ComponentRepository`].
///
/// Metadata lives in one JSONB column per component, shaped exactly like
/// [`MetadataBag`]'s serialization. Reads deserialize the bag and resolve
/// precedence in core logic; each write is a single `jsonb_set` UPDATE so
/// a (tier, key) replace is atomic and never observed half-written.
#[derive(Clone)]
pub struct PgComponentRepository {
    pool: PgPool,
}

impl PgComponentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deserialize a stored metadata column, tolerating rows predating the
    /// current shape (malformed bags read as empty, with a warning).
    fn metadata_from_column(purl: &str, raw: JsonValue) -> MetadataBag {
        match serde_json::from_value(raw) {
            Ok(bag) => bag,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "components",
                    purl,
                    error = %e,
                    "Stored metadata did not parse; treating as empty"
                );
                MetadataBag::new()
            }
        }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Component {
        let purl: String = row.get("purl");
        let metadata = Self::metadata_from_column(&purl, row.get("metadata"));
        Component {
            id: row.get("id"),
            purl,
            name: row.get("name"),
            metadata,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Load just the metadata bag for a component, if the component exists.
    async fn load_metadata(&self, purl: &str) -> Result<Option<MetadataBag>> {
        let raw: Option<JsonValue> =
            sqlx::query_scalar("SELECT metadata FROM components WHERE purl = $1")
                .bind(purl)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(raw.map(|value| Self::metadata_from_column(purl, value)))
    }
}

#[async_trait]
impl ComponentRepository for PgComponentRepository {
    async fn get(&self, purl: &str) -> Result<Option<Component>> {
        let row = sqlx::query(
            "SELECT id, purl, name, metadata, created_at, updated_at
             FROM components WHERE purl = $1",
        )
        .bind(purl)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn ensure(&self, purl: &str) -> Result<Component> {
        let coordinate: PackageUrl = purl.parse()?;
        let canonical = coordinate.to_string();

        sqlx::query(
            "INSERT INTO components (id, purl, name, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, '{}'::jsonb, $4, $4)
             ON CONFLICT (purl) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&canonical)
        .bind(coordinate.display_name())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.get(&canonical)
            .await?
            .ok_or_else(|| Error::ComponentNotFound(canonical))
    }

    async fn list_purls(&self) -> Result<Vec<String>> {
        let purls: Vec<String> = sqlx::query_scalar("SELECT purl FROM components ORDER BY purl")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(purls)
    }

    async fn get_metadata(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<JsonValue>> {
        Ok(self
            .load_metadata(purl)
            .await?
            .and_then(|bag| bag.get(key, tier).cloned()))
    }

    async fn get_expiration(
        &self,
        purl: &str,
        key: &str,
        tier: Option<MetadataTier>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .load_metadata(purl)
            .await?
            .and_then(|bag| bag.expiration(key, tier)))
    }

    async fn set_metadata(
        &self,
        purl: &str,
        tier: MetadataTier,
        key: &str,
        value: JsonValue,
        lifetime: Option<chrono::Duration>,
    ) -> Result<bool> {
        if value.is_null() {
            return Ok(false);
        }

        let record = MetadataRecord {
            value,
            expiration: lifetime.map(|d| Utc::now() + d),
            properties: None,
        };
        let record = serde_json::to_value(&record)?;

        // One statement: create the tier object if missing, then replace
        // the record at (tier, key). Last writer wins per key.
        let result = sqlx::query(
            "UPDATE components
             SET metadata = jsonb_set(
                     jsonb_set(metadata, ARRAY[$2::text],
                               COALESCE(metadata -> $2::text, '{}'::jsonb), true),
                     ARRAY[$2::text, $3::text], $4, true
                 ),
                 updated_at = $5
             WHERE purl = $1",
        )
        .bind(purl)
        .bind(tier.as_str())
        .bind(key)
        .bind(&record)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::ComponentNotFound(purl.to_string()));
        }
        Ok(true)
    }
}
