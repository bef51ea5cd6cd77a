//! Permission gate
//!
//! An actor may modify shared evaluation records only when every selected
//! row belongs to a project the actor is a member of. Administrators bypass
//! the membership check.

use std::collections::BTreeSet;

use hl_common::db::VariantSampleId;
use hl_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PermissionGate {
    pool: SqlitePool,
}

impl PermissionGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn is_admin(&self, actor: &str) -> Result<bool> {
        let admin: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM users WHERE username = ?")
            .bind(actor)
            .fetch_optional(&self.pool)
            .await?;
        Ok(admin.unwrap_or(false))
    }

    /// True when `actor` is a known user
    pub async fn is_known(&self, actor: &str) -> Result<bool> {
        let known: Option<String> = sqlx::query_scalar("SELECT username FROM users WHERE username = ?")
            .bind(actor)
            .fetch_optional(&self.pool)
            .await?;
        Ok(known.is_some())
    }

    /// Public records accept any known user
    pub async fn require_known(&self, actor: &str) -> Result<()> {
        if self.is_known(actor).await? {
            return Ok(());
        }
        warn!(actor, "Unknown user denied");
        Err(Error::Unauthorized(format!("{} is not a registered user", actor)))
    }

    /// True when `actor` may modify every row in `rows`
    ///
    /// An empty selection is allowed; rows unknown to storage are not.
    pub async fn can_modify(&self, actor: &str, rows: &[VariantSampleId]) -> Result<bool> {
        if self.is_admin(actor).await? {
            debug!(actor, "Administrator bypasses project membership check");
            return Ok(true);
        }

        let wanted: BTreeSet<VariantSampleId> = rows.iter().copied().collect();
        if wanted.is_empty() {
            return Ok(true);
        }

        let placeholders = vec!["?"; wanted.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(DISTINCT vs.variant_sample_id) FROM variant_sample vs \
             JOIN projects_users pu ON pu.project_id = vs.project_id \
             WHERE pu.username = ? AND vs.variant_sample_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(actor);
        for id in &wanted {
            query = query.bind(id.0);
        }
        let permitted = query.fetch_one(&self.pool).await?;

        Ok(permitted as usize == wanted.len())
    }

    /// Fail with [`Error::Unauthorized`] unless `actor` may modify `rows`
    pub async fn require_modify(&self, actor: &str, rows: &[VariantSampleId]) -> Result<()> {
        if self.can_modify(actor, rows).await? {
            return Ok(());
        }
        warn!(actor, rows = rows.len(), "Modification denied");
        Err(Error::Unauthorized(format!(
            "{} is not a member of every project in the selection",
            actor
        )))
    }
}
