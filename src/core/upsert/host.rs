// src/core/upsert/host.rs

//! Upserter routine for `hosts`, natural-keyed on `host_name` (§3 Host,
//! §4.D). Unlike every other entity, this routine has no pre-insert
//! host-existence check to perform — it's the one that creates that row.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::Host;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertHost<'a> {
    pub host_uuid: Option<Uuid>,
    pub host_name: &'a str,
    pub host_type: &'a str,
    pub host_key: &'a str,
    pub host_status: &'a str,
}

fn validate(input: &UpsertHost<'_>) -> Result<()> {
    if input.host_name.trim().is_empty() {
        return Err(AnvilError::Config("host_name is required".to_string()));
    }
    if input.host_type.trim().is_empty() {
        return Err(AnvilError::Config("host_type is required".to_string()));
    }
    Ok(())
}

/// Inserts or updates a `hosts` row, returning its UUID.
pub async fn upsert_host(ctx: &AnvilContext, pool: &PgPool, input: UpsertHost<'_>) -> Result<Uuid> {
    validate(&input)?;

    let existing = match input.host_uuid {
        Some(uuid) => sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE host_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE host_name = $1")
            .bind(input.host_name)
            .fetch_optional(pool)
            .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.host_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO hosts (host_uuid, host_name, host_type, host_key, host_status, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuid)
        .bind(input.host_name)
        .bind(input.host_type)
        .bind(input.host_key)
        .bind(input.host_status)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(uuid);
    };

    let proposed = Host {
        host_uuid: current.host_uuid,
        host_name: input.host_name.to_string(),
        host_type: input.host_type.to_string(),
        host_key: input.host_key.to_string(),
        host_status: input.host_status.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(current.host_uuid);
    }

    sqlx::query(
        "UPDATE hosts SET host_name = $1, host_type = $2, host_key = $3, host_status = $4, modified_date = $5
         WHERE host_uuid = $6",
    )
    .bind(&proposed.host_name)
    .bind(&proposed.host_type)
    .bind(&proposed.host_key)
    .bind(&proposed.host_status)
    .bind(now)
    .bind(current.host_uuid)
    .execute(pool)
    .await?;

    Ok(current.host_uuid)
}

/// Marks the local host active, the step the Connector performs once the
/// pool is live and the local host identity is confirmed (§4.A step 6).
pub async fn mark_active(ctx: &AnvilContext, pool: &PgPool, host_name: &str, host_type: &str) -> Result<Uuid> {
    upsert_host(
        ctx,
        pool,
        UpsertHost {
            host_uuid: Some(ctx.local_host_uuid),
            host_name,
            host_type,
            host_key: "",
            host_status: "active",
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_host_name() {
        let input = UpsertHost {
            host_uuid: None,
            host_name: "",
            host_type: "node",
            host_key: "",
            host_status: "active",
        };
        assert!(validate(&input).is_err());
    }

    #[test]
    fn rejects_empty_host_type() {
        let input = UpsertHost {
            host_uuid: None,
            host_name: "node1",
            host_type: "",
            host_key: "",
            host_status: "active",
        };
        assert!(validate(&input).is_err());
    }

    #[test]
    fn accepts_well_formed_input() {
        let input = UpsertHost {
            host_uuid: None,
            host_name: "node1",
            host_type: "node",
            host_key: "",
            host_status: "active",
        };
        assert!(validate(&input).is_ok());
    }
}
