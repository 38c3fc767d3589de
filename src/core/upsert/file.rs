// src/core/upsert/file.rs

//! Upserter routines for `files` (natural-keyed on `(file_name, file_md5sum)`
//! — identity follows content, §3 File) and `file_locations` (natural-keyed
//! on `(host_uuid, file_uuid)`, tracking which peers currently hold a copy).

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::{AnvilFile, FileLocation};
use crate::core::upsert::local_host_exists;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertFile<'a> {
    pub file_uuid: Option<Uuid>,
    pub name: &'a str,
    pub directory: &'a str,
    pub size: i64,
    pub md5sum: &'a str,
    pub file_type: &'a str,
    pub mtime: i64,
}

fn validate(input: &UpsertFile<'_>) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("file name is required".to_string()));
    }
    if input.md5sum.trim().len() != 32 {
        return Err(AnvilError::Config("file md5sum must be a 32-character hex digest".to_string()));
    }
    Ok(())
}

pub async fn upsert_file(ctx: &AnvilContext, pool: &PgPool, input: UpsertFile<'_>) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.file_uuid {
        Some(uuid) => sqlx::query_as::<_, AnvilFile>("SELECT * FROM files WHERE file_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, AnvilFile>(
            "SELECT * FROM files WHERE file_name = $1 AND file_md5sum = $2",
        )
        .bind(input.name)
        .bind(input.md5sum)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.file_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO files
                (file_uuid, file_name, file_directory, file_size, file_md5sum, file_type,
                 file_mtime, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(uuid)
        .bind(input.name)
        .bind(input.directory)
        .bind(input.size)
        .bind(input.md5sum)
        .bind(input.file_type)
        .bind(input.mtime)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = AnvilFile {
        file_uuid: current.file_uuid,
        file_name: input.name.to_string(),
        file_directory: input.directory.to_string(),
        file_size: input.size,
        file_md5sum: input.md5sum.to_string(),
        file_type: input.file_type.to_string(),
        file_mtime: input.mtime,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.file_uuid));
    }

    sqlx::query(
        "UPDATE files SET file_name = $1, file_directory = $2, file_size = $3, file_md5sum = $4,
                file_type = $5, file_mtime = $6, modified_date = $7
         WHERE file_uuid = $8",
    )
    .bind(&proposed.file_name)
    .bind(&proposed.file_directory)
    .bind(proposed.file_size)
    .bind(&proposed.file_md5sum)
    .bind(&proposed.file_type)
    .bind(proposed.file_mtime)
    .bind(now)
    .bind(current.file_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.file_uuid))
}

pub struct UpsertFileLocation {
    pub file_location_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub file_uuid: Uuid,
    pub active: bool,
}

pub async fn upsert_file_location(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertFileLocation,
) -> Result<Option<Uuid>> {
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.file_location_uuid {
        Some(uuid) => sqlx::query_as::<_, FileLocation>(
            "SELECT * FROM file_locations WHERE file_location_uuid = $1",
        )
        .bind(uuid)
        .fetch_optional(pool)
        .await?,
        None => sqlx::query_as::<_, FileLocation>(
            "SELECT * FROM file_locations WHERE file_location_host_uuid = $1 AND file_location_file_uuid = $2",
        )
        .bind(input.host_uuid)
        .bind(input.file_uuid)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.file_location_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO file_locations
                (file_location_uuid, file_location_host_uuid, file_location_file_uuid,
                 file_location_active, modified_date)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.file_uuid)
        .bind(input.active)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = FileLocation {
        file_location_uuid: current.file_location_uuid,
        file_location_host_uuid: input.host_uuid,
        file_location_file_uuid: input.file_uuid,
        file_location_active: input.active,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.file_location_uuid));
    }

    sqlx::query(
        "UPDATE file_locations SET file_location_host_uuid = $1, file_location_file_uuid = $2,
                file_location_active = $3, modified_date = $4
         WHERE file_location_uuid = $5",
    )
    .bind(proposed.file_location_host_uuid)
    .bind(proposed.file_location_file_uuid)
    .bind(proposed.file_location_active)
    .bind(now)
    .bind(current.file_location_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.file_location_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_md5sum() {
        let input = UpsertFile {
            file_uuid: None,
            name: "alma-9.4-x86_64-dvd.iso",
            directory: "/mnt/shared/files",
            size: 123,
            md5sum: "deadbeef",
            file_type: "iso",
            mtime: 0,
        };
        assert!(validate(&input).is_err());
    }

    #[test]
    fn accepts_well_formed_input() {
        let input = UpsertFile {
            file_uuid: None,
            name: "alma-9.4-x86_64-dvd.iso",
            directory: "/mnt/shared/files",
            size: 123,
            md5sum: "d41d8cd98f00b204e9800998ecf8427e",
            file_type: "iso",
            mtime: 0,
        };
        assert!(validate(&input).is_ok());
    }
}
