// src/core/upsert/variable.rs

//! Upserter routine for `variables`, natural-keyed on
//! `(variable_name, variable_source_uuid)` (§3 Variable, §4.D). The Lock
//! Manager (§4.H) stores its token in this table under the fixed name
//! `lock_request` with no source scope.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::Variable;
use crate::core::upsert::local_host_exists;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertVariable<'a> {
    pub variable_uuid: Option<Uuid>,
    pub name: &'a str,
    pub value: &'a str,
    pub default: &'a str,
    pub description: &'a str,
    pub section: &'a str,
    pub source_uuid: Option<Uuid>,
    pub source_table: Option<&'a str>,
}

fn validate(input: &UpsertVariable<'_>) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("variable name is required".to_string()));
    }
    Ok(())
}

/// Looks up a variable by its natural key, independent of whether a row
/// exists yet. Used both by the general Upserter path and directly by the
/// Lock Manager to read the current lock token without writing anything.
pub async fn find_by_name(
    pool: &PgPool,
    name: &str,
    source_uuid: Option<Uuid>,
) -> Result<Option<Variable>> {
    let row = sqlx::query_as::<_, Variable>(
        "SELECT * FROM variables WHERE variable_name = $1
         AND variable_source_uuid IS NOT DISTINCT FROM $2",
    )
    .bind(name)
    .bind(source_uuid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn upsert_variable(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertVariable<'_>,
) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.variable_uuid {
        Some(uuid) => sqlx::query_as::<_, Variable>("SELECT * FROM variables WHERE variable_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => find_by_name(pool, input.name, input.source_uuid).await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.variable_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO variables
                (variable_uuid, variable_name, variable_value, variable_default,
                 variable_description, variable_section, variable_source_uuid,
                 variable_source_table, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(uuid)
        .bind(input.name)
        .bind(input.value)
        .bind(input.default)
        .bind(input.description)
        .bind(input.section)
        .bind(input.source_uuid)
        .bind(input.source_table)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Variable {
        variable_uuid: current.variable_uuid,
        variable_name: input.name.to_string(),
        variable_value: input.value.to_string(),
        variable_default: input.default.to_string(),
        variable_description: input.description.to_string(),
        variable_section: input.section.to_string(),
        variable_source_uuid: input.source_uuid,
        variable_source_table: input.source_table.map(String::from),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.variable_uuid));
    }

    sqlx::query(
        "UPDATE variables SET variable_name = $1, variable_value = $2, variable_default = $3,
                variable_description = $4, variable_section = $5, variable_source_uuid = $6,
                variable_source_table = $7, modified_date = $8
         WHERE variable_uuid = $9",
    )
    .bind(&proposed.variable_name)
    .bind(&proposed.variable_value)
    .bind(&proposed.variable_default)
    .bind(&proposed.variable_description)
    .bind(&proposed.variable_section)
    .bind(proposed.variable_source_uuid)
    .bind(&proposed.variable_source_table)
    .bind(now)
    .bind(current.variable_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.variable_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        let input = UpsertVariable {
            variable_uuid: None,
            name: "",
            value: "1",
            default: "",
            description: "",
            section: "",
            source_uuid: None,
            source_table: None,
        };
        assert!(validate(&input).is_err());
    }
}
