// src/core/upsert/session.rs

//! Upserter routine for `sessions` (§3 Session, §4.D). Natural-keyed on
//! `(host_uuid, user_uuid)` — one active session row per user per host;
//! clearing `session_salt` logs the session out rather than deleting the
//! row, matching `Session::is_logged_out`.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::Session;
use crate::core::upsert::local_host_exists;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertSession<'a> {
    pub session_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub user_uuid: Uuid,
    pub salt: &'a str,
    pub user_agent: &'a str,
}

fn validate(input: &UpsertSession<'_>) -> Result<()> {
    if input.user_uuid.is_nil() {
        return Err(AnvilError::Config("session user_uuid is required".to_string()));
    }
    Ok(())
}

pub async fn upsert_session(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertSession<'_>,
) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.session_uuid {
        Some(uuid) => sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE session_host_uuid = $1 AND session_user_uuid = $2",
        )
        .bind(input.host_uuid)
        .bind(input.user_uuid)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.session_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO sessions
                (session_uuid, session_host_uuid, session_user_uuid, session_salt,
                 session_user_agent, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.user_uuid)
        .bind(input.salt)
        .bind(input.user_agent)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Session {
        session_uuid: current.session_uuid,
        session_host_uuid: input.host_uuid,
        session_user_uuid: input.user_uuid,
        session_salt: input.salt.to_string(),
        session_user_agent: input.user_agent.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.session_uuid));
    }

    sqlx::query(
        "UPDATE sessions SET session_host_uuid = $1, session_user_uuid = $2, session_salt = $3,
                session_user_agent = $4, modified_date = $5
         WHERE session_uuid = $6",
    )
    .bind(proposed.session_host_uuid)
    .bind(proposed.session_user_uuid)
    .bind(&proposed.session_salt)
    .bind(&proposed.session_user_agent)
    .bind(now)
    .bind(current.session_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.session_uuid))
}

/// Logs a session out by clearing its salt (§3 "clearing the salt logs the
/// user out").
pub async fn log_out(ctx: &AnvilContext, pool: &PgPool, session_uuid: Uuid) -> Result<()> {
    let current = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_uuid = $1")
        .bind(session_uuid)
        .fetch_optional(pool)
        .await?
        .ok_or(AnvilError::RowNotFound {
            table: "sessions".to_string(),
            uuid: session_uuid,
        })?;

    upsert_session(
        ctx,
        pool,
        UpsertSession {
            session_uuid: Some(session_uuid),
            host_uuid: current.session_host_uuid,
            user_uuid: current.session_user_uuid,
            salt: "",
            user_agent: &current.session_user_agent,
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nil_user_uuid() {
        let input = UpsertSession {
            session_uuid: None,
            host_uuid: Uuid::new_v4(),
            user_uuid: Uuid::nil(),
            salt: "abc123",
            user_agent: "curl/8.0",
        };
        assert!(validate(&input).is_err());
    }
}
