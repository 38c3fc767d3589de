// src/core/archiver.rs

//! Component G: the Archiver (§4.G). Caps history-table size by streaming
//! the oldest rows out to a `COPY`-compatible dump file and deleting them
//! in chunks. Dashboard-only — nodes skip entirely.

use crate::core::connector::local_hostname;
use crate::core::context::AnvilContext;
use crate::core::drift::CHECK_LIST;
use crate::core::errors::{AnvilError, Result};
use sqlx::{PgPool, Row};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tracing::{info, warn};

/// One archiving run's outcome.
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    pub skipped: bool,
    pub files_written: Vec<PathBuf>,
    pub rows_deleted: u64,
}

impl ArchiveReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

async fn local_host_type(pool: &PgPool, local_host_uuid: uuid::Uuid) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT host_type FROM hosts WHERE host_uuid = $1")
        .bind(local_host_uuid)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(t,)| t))
}

async fn table_row_count(pool: &PgPool, schema: &str, table: &str) -> Result<Option<i64>> {
    if !table_exists(pool, schema, table).await? {
        return Ok(None);
    }
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {schema}.{table}"))
        .fetch_one(pool)
        .await?;
    Ok(Some(count))
}

async fn table_exists(pool: &PgPool, schema: &str, table: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables
         WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn history_columns(pool: &PgPool, table: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'history' AND table_name = $1 AND column_name <> 'history_id'
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(c,)| c).collect())
}

/// Escapes a single value per the `COPY` text format's grammar: backslash
/// doubled, tab and newline escaped (§6 "Archive dump file format").
fn escape_copy_value(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\t', "\\t").replace('\n', "\\n")
}

/// Renders the `COPY ... FROM stdin;` dump body for a set of rows, per
/// the exact framing in §6.
fn render_dump(table: &str, columns: &[String], rows: &[Vec<Option<String>>]) -> String {
    let mut out = format!("COPY {table} ({}) FROM stdin;\n", columns.join(", "));
    for row in rows {
        let line = row
            .iter()
            .map(|v| match v {
                Some(s) => escape_copy_value(s),
                None => "\\N".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str("\\.\n\n");
    out
}

fn ensure_archive_directory(directory: &str) -> Result<()> {
    let path = std::path::Path::new(directory);
    if !path.is_absolute() {
        return Err(AnvilError::Archive(format!("{directory} is not an absolute path")));
    }
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Archives a single history table: stages rows to a dump file, deletes
/// them once the file is written, and reports how many rows moved
/// (§4.G steps 1–4).
async fn archive_table(ctx: &AnvilContext, pool: &PgPool, table: &str, timestamp: i64) -> Result<(Vec<PathBuf>, u64)> {
    let Some(count_now) = table_row_count(pool, "history", table).await? else {
        return Ok((Vec::new(), 0));
    };
    let trigger = ctx.config.archive.trigger as i64;
    if trigger == 0 || count_now <= trigger {
        return Ok((Vec::new(), 0));
    }

    let target_count = ctx.config.archive.count as i64;
    let to_remove = count_now - target_count;
    let division = ctx.config.archive.division.max(1) as i64;
    let loops = to_remove / division + 1;
    let per_loop = (to_remove as f64 / loops as f64).round() as i64;

    let columns = history_columns(pool, table).await?;
    let hostname = local_hostname();
    let short_host = hostname.split('.').next().unwrap_or(&hostname).to_string();

    let mut files = Vec::new();
    let mut deleted = 0u64;

    for loop_index in 0..loops {
        let offset = loop_index * per_loop;
        let boundary: Option<(chrono::DateTime<chrono::Utc>,)> = sqlx::query_as(&format!(
            "SELECT modified_date FROM history.{table} ORDER BY modified_date ASC OFFSET $1 LIMIT 1"
        ))
        .bind(offset)
        .fetch_optional(pool)
        .await?;
        let Some((boundary,)) = boundary else {
            break;
        };

        let select_cols = columns
            .iter()
            .map(|c| format!("{c}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            "SELECT {select_cols} FROM history.{table} WHERE modified_date >= $1"
        ))
        .bind(boundary)
        .fetch_all(pool)
        .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                record.push(row.try_get::<Option<String>, _>(i).unwrap_or(None));
            }
            values.push(record);
        }
        if values.is_empty() {
            continue;
        }

        let dump = render_dump(table, &columns, &values);
        let filename = format!("{short_host}.{table}.{timestamp}.{loop_index}.out");
        let path = std::path::Path::new(&ctx.config.archive.directory).join(&filename);
        std::fs::write(&path, dump)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        files.push(path);

        sqlx::query(&format!("DELETE FROM history.{table} WHERE modified_date >= $1"))
            .bind(boundary)
            .execute(pool)
            .await?;
        deleted += values.len() as u64;
    }

    Ok((files, deleted))
}

/// Runs the Archiver across every table in [`CHECK_LIST`] against the
/// reader peer. Dashboard-only; returns [`ArchiveReport::skipped`]
/// immediately on a node (§4.G "Archiving is dashboard-only").
pub async fn run(ctx: &AnvilContext, timestamp: i64) -> Result<ArchiveReport> {
    let reader_uuid = ctx.reader().ok_or(AnvilError::NoLivePeers)?;
    let pool = ctx.peer(reader_uuid).ok_or(AnvilError::NoLivePeers)?.pool;

    match local_host_type(&pool, ctx.local_host_uuid).await? {
        Some(t) if t == "dashboard" => {}
        _ => {
            info!("archiver skipped: local host is not a dashboard");
            return Ok(ArchiveReport::skipped());
        }
    }

    ensure_archive_directory(&ctx.config.archive.directory)?;

    let mut report = ArchiveReport::default();
    for &table in CHECK_LIST {
        match archive_table(ctx, &pool, table, timestamp).await {
            Ok((files, deleted)) => {
                report.files_written.extend(files);
                report.rows_deleted += deleted;
            }
            Err(e) => {
                warn!(table, error = %e, "archive failed for table, continuing");
            }
        }
    }

    if report.rows_deleted > 0 {
        sqlx::query("VACUUM FULL").execute(&pool).await?;
        info!(rows = report.rows_deleted, "archive vacuum complete");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_format_matches_copy_grammar() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![
            vec![Some("x\ty".to_string()), None],
            vec![Some("line\nbreak".to_string()), Some("plain".to_string())],
        ];
        let dump = render_dump("t", &columns, &rows);
        assert!(dump.starts_with("COPY t (a, b) FROM stdin;\n"));
        assert!(dump.contains("x\\ty\t\\N\n"));
        assert!(dump.contains("line\\nbreak\tplain\n"));
        assert!(dump.ends_with("\\.\n\n"));
    }

    #[test]
    fn escape_handles_backslash_tab_newline() {
        assert_eq!(escape_copy_value("a\\b"), "a\\\\b");
        assert_eq!(escape_copy_value("a\tb"), "a\\tb");
        assert_eq!(escape_copy_value("a\nb"), "a\\nb");
    }

    #[test]
    fn loop_count_matches_trigger_math() {
        let to_remove: i64 = 50_000 - 10_000;
        let division: i64 = 25_000;
        let loops = to_remove / division + 1;
        assert_eq!(loops, 2);
        let per_loop = (to_remove as f64 / loops as f64).round() as i64;
        assert_eq!(per_loop, 20_000);
    }

    #[test]
    fn rejects_relative_directory() {
        assert!(ensure_archive_directory("relative/path").is_err());
    }
}
