//! Cached deployer tool versions, one row per deployer kind.

use async_trait::async_trait;
use deployit_core::deployer::DeployerKind;
use deployit_core::versions::{VersionSet, VersionStore, parse_version_set};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::{DbError, DbResult};

/// PostgreSQL implementation of [`VersionStore`]. A replace is one upsert,
/// so readers see either the old set or the new one.
pub struct PgVersionStore {
    pool: PgPool,
}

impl PgVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, kind: DeployerKind) -> DbResult<Option<VersionSet>> {
        let row: Option<(Json<Vec<String>>,)> =
            sqlx::query_as("SELECT versions FROM deployer_versions WHERE deployer_kind = $1")
                .bind(kind.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(Json(versions),)| {
            parse_version_set(versions.iter().map(String::as_str))
                .map_err(|e| DbError::Decode(e.to_string()))
        })
        .transpose()
    }

    async fn upsert(&self, kind: DeployerKind, versions: &VersionSet) -> DbResult<()> {
        let listed: Vec<String> = versions.iter().map(ToString::to_string).collect();
        sqlx::query(
            r#"
            INSERT INTO deployer_versions (deployer_kind, versions, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (deployer_kind) DO UPDATE
            SET versions = EXCLUDED.versions, updated_at = now()
            "#,
        )
        .bind(kind.to_string())
        .bind(Json(listed))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn get(&self, kind: DeployerKind) -> deployit_core::Result<Option<VersionSet>> {
        Ok(self.fetch(kind).await?)
    }

    async fn replace(&self, kind: DeployerKind, versions: VersionSet) -> deployit_core::Result<()> {
        Ok(self.upsert(kind, &versions).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn test_replace_overwrites_whole_set() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let store = PgVersionStore::new(pool);

        let first = parse_version_set(["1.6.2", "1.7.3"]).unwrap();
        let second = parse_version_set(["1.8.1"]).unwrap();
        store.replace(DeployerKind::OpenTofu, first).await.unwrap();
        store.replace(DeployerKind::OpenTofu, second.clone()).await.unwrap();

        assert_eq!(store.get(DeployerKind::OpenTofu).await.unwrap(), Some(second));
    }
}
