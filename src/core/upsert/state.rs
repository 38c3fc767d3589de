// src/core/upsert/state.rs

//! Upserter routine for `states` — ephemeral per-host tags with no history
//! table and no trigger (§3, §4.E/F: "states exempt from resync"). Still
//! routed through the Upserter so the pre-insert host check and value-column
//! comparison stay consistent with every other entity.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::State;
use crate::core::upsert::local_host_exists;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertState<'a> {
    pub state_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub name: &'a str,
    pub note: &'a str,
}

fn validate(input: &UpsertState<'_>) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("state name is required".to_string()));
    }
    Ok(())
}

pub async fn upsert_state(ctx: &AnvilContext, pool: &PgPool, input: UpsertState<'_>) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.state_uuid {
        Some(uuid) => sqlx::query_as::<_, State>("SELECT * FROM states WHERE state_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, State>(
            "SELECT * FROM states WHERE state_host_uuid = $1 AND state_name = $2",
        )
        .bind(input.host_uuid)
        .bind(input.name)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.state_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO states (state_uuid, state_host_uuid, state_name, state_note, modified_date)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.name)
        .bind(input.note)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = State {
        state_uuid: current.state_uuid,
        state_host_uuid: input.host_uuid,
        state_name: input.name.to_string(),
        state_note: input.note.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.state_uuid));
    }

    sqlx::query(
        "UPDATE states SET state_host_uuid = $1, state_name = $2, state_note = $3, modified_date = $4
         WHERE state_uuid = $5",
    )
    .bind(proposed.state_host_uuid)
    .bind(&proposed.state_name)
    .bind(&proposed.state_note)
    .bind(now)
    .bind(current.state_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.state_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        let input = UpsertState {
            state_uuid: None,
            host_uuid: Uuid::new_v4(),
            name: "",
            note: "",
        };
        assert!(validate(&input).is_err());
    }
}
