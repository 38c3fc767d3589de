// src/core/upsert/alert.rs

//! Upserter routine for `alerts` (§3 Alert, §4.D), plus the "at most one
//! alert per (setter, record-locator, alert-name) tuple until explicitly
//! cleared" de-duplication rule from §7's recovery policy. There is no
//! natural key in the data model beyond the supplied UUID; alerts are
//! typically fresh inserts, with the de-dup responsibility living in the
//! caller (§4.A's "register an alert exactly once per peer").

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::{Alert, AlertLevel};
use crate::core::upsert::local_host_exists;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertAlert<'a> {
    pub alert_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub set_by: &'a str,
    pub level: AlertLevel,
    pub title_key: &'a str,
    pub title_vars: &'a str,
    pub message_key: &'a str,
    pub message_vars: &'a str,
    pub sort: i32,
    pub header_flag: bool,
}

fn validate(input: &UpsertAlert<'_>) -> Result<()> {
    if input.set_by.trim().is_empty() {
        return Err(AnvilError::Config("alert set_by is required".to_string()));
    }
    if input.title_key.trim().is_empty() {
        return Err(AnvilError::Config("alert title_key is required".to_string()));
    }
    Ok(())
}

/// Checks whether an unresolved alert already exists for this
/// `(set_by, host_uuid, title_key)` tuple, so the Connector's connectivity
/// classifier (§4.A step 4, §7 kind 2) raises at most one per peer.
pub async fn already_raised(pool: &PgPool, set_by: &str, host_uuid: Uuid, title_key: &str) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (
            SELECT 1 FROM alerts
            WHERE alert_set_by = $1 AND alert_host_uuid = $2 AND alert_title_key = $3
        )",
    )
    .bind(set_by)
    .bind(host_uuid)
    .bind(title_key)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Clears a previously raised alert — the counterpart to `already_raised`,
/// used on a later successful reconnect (§7 kind 2, "a later successful
/// reconnect clears it").
pub async fn clear(pool: &PgPool, set_by: &str, host_uuid: Uuid, title_key: &str) -> Result<()> {
    sqlx::query(
        "DELETE FROM alerts WHERE alert_set_by = $1 AND alert_host_uuid = $2 AND alert_title_key = $3",
    )
    .bind(set_by)
    .bind(host_uuid)
    .bind(title_key)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_alert(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertAlert<'_>,
) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.alert_uuid {
        Some(uuid) => sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE alert_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => None,
    };

    let now = ctx.refresh().await?;
    let level = input.level.as_str();

    let Some(current) = existing else {
        let uuid = input.alert_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO alerts
                (alert_uuid, alert_host_uuid, alert_set_by, alert_level, alert_title_key,
                 alert_title_vars, alert_message_key, alert_message_vars, alert_sort,
                 alert_header_flag, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.set_by)
        .bind(level)
        .bind(input.title_key)
        .bind(input.title_vars)
        .bind(input.message_key)
        .bind(input.message_vars)
        .bind(input.sort)
        .bind(input.header_flag)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Alert {
        alert_uuid: current.alert_uuid,
        alert_host_uuid: input.host_uuid,
        alert_set_by: input.set_by.to_string(),
        alert_level: level.to_string(),
        alert_title_key: input.title_key.to_string(),
        alert_title_vars: input.title_vars.to_string(),
        alert_message_key: input.message_key.to_string(),
        alert_message_vars: input.message_vars.to_string(),
        alert_sort: input.sort,
        alert_header_flag: input.header_flag,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.alert_uuid));
    }

    sqlx::query(
        "UPDATE alerts SET alert_host_uuid = $1, alert_set_by = $2, alert_level = $3,
                alert_title_key = $4, alert_title_vars = $5, alert_message_key = $6,
                alert_message_vars = $7, alert_sort = $8, alert_header_flag = $9, modified_date = $10
         WHERE alert_uuid = $11",
    )
    .bind(proposed.alert_host_uuid)
    .bind(&proposed.alert_set_by)
    .bind(&proposed.alert_level)
    .bind(&proposed.alert_title_key)
    .bind(&proposed.alert_title_vars)
    .bind(&proposed.alert_message_key)
    .bind(&proposed.alert_message_vars)
    .bind(proposed.alert_sort)
    .bind(proposed.alert_header_flag)
    .bind(now)
    .bind(current.alert_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.alert_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_title_key() {
        let input = UpsertAlert {
            alert_uuid: None,
            host_uuid: Uuid::nil(),
            set_by: "anvil-connect",
            level: AlertLevel::Warning,
            title_key: "",
            title_vars: "",
            message_key: "message_0001",
            message_vars: "",
            sort: 0,
            header_flag: false,
        };
        assert!(validate(&input).is_err());
    }
}
