// src/core/resync.rs

//! Component F: the Resync Engine (§4.F). For each table (skipping
//! `states`), reads every peer's full history in `modified_date` order
//! and emits the minimum set of public inserts/updates and history
//! inserts needed to bring every peer to the same state.
//!
//! Runs after the Drift Detector and the Archiver (§4.F precondition).
//! Column sets are discovered at runtime via `information_schema` rather
//! than hardcoded per table, per §9's "typed records... the 'unified'
//! resync view becomes a map keyed by `(table, modified_date, uuid)`"
//! note — the engine itself still has to operate generically since the
//! column list varies per table.

use crate::core::context::AnvilContext;
use crate::core::drift::CHECK_LIST;
use crate::core::executor::{self, Batch};
use crate::core::quoter;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

/// A single row's value columns, text-cast so the engine can compare and
/// re-emit them generically regardless of underlying SQL type.
type ColumnValues = HashMap<String, Option<String>>;

/// One versioned row read from a peer's history table.
struct HistoryRow {
    modified_date_epoch: i64,
    row_uuid: Uuid,
    values: ColumnValues,
}

/// Strips a trailing plural suffix, the heuristic behind §4.F step 2's
/// "<singular>_uuid" and "<singular-es-stripped>_uuid" candidates.
fn singularize(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ses").map(|s| format!("{s}s")) {
        return stem;
    }
    if let Some(stem) = table.strip_suffix("xes").map(|s| format!("{s}x")) {
        return stem;
    }
    if let Some(stem) = table.strip_suffix("ches").map(|s| format!("{s}ch")) {
        return stem;
    }
    if let Some(stem) = table.strip_suffix('s') {
        return stem.to_string();
    }
    table.to_string()
}

/// Discovers the identity UUID column for a table: one of `<table>_uuid`,
/// `<singular>_uuid`, restricted to an actual `uuid, NOT NULL` column
/// (§4.F step 2). Tables with no such column are skipped entirely.
async fn discover_uuid_column(pool: &PgPool, table: &str) -> Option<String> {
    let candidates = [format!("{table}_uuid"), format!("{}_uuid", singularize(table))];
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1
           AND data_type = 'uuid' AND is_nullable = 'NO'",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap_or_default();

    let found: HashSet<String> = rows.into_iter().map(|(c,)| c).collect();
    candidates.into_iter().find(|c| found.contains(c))
}

/// Discovers every value column on `public.<table>` (everything but
/// `history_id`, which only exists in the history twin) — §4.F step 3.
async fn discover_value_columns(pool: &PgPool, table: &str) -> Vec<String> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1 AND column_name <> 'history_id'
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    rows.into_iter().map(|(c,)| c).collect()
}

async fn host_uuid_column(pool: &PgPool, table: &str) -> Option<String> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1 AND column_name LIKE '%\\_host\\_uuid' ESCAPE '\\'",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    rows.into_iter().next().map(|(c,)| c)
}

fn select_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{c}::text AS {c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads every version of every row from `history.<table>`, newest first
/// (§4.F step 4).
async fn read_history(
    pool: &PgPool,
    table: &str,
    uuid_col: &str,
    columns: &[String],
    host_col: Option<&str>,
    local_host_uuid: Uuid,
) -> Vec<HistoryRow> {
    let mut sql = format!(
        "SELECT {}, round(extract(epoch FROM modified_date))::bigint AS __epoch FROM history.{table}",
        select_list(columns)
    );
    if let Some(col) = host_col {
        sql.push_str(&format!(" WHERE {col} = '{local_host_uuid}'"));
    }
    sql.push_str(" ORDER BY modified_date DESC");

    let Ok(rows) = sqlx::query(&sql).fetch_all(pool).await else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        use sqlx::Row;
        let mut values = ColumnValues::new();
        for col in columns {
            let v: Option<String> = row.try_get(col.as_str()).unwrap_or(None);
            values.insert(col.clone(), v);
        }
        let Some(Some(uuid_str)) = values.get(uuid_col) else {
            continue;
        };
        let Ok(row_uuid) = Uuid::parse_str(uuid_str) else {
            continue;
        };
        let epoch: i64 = row.try_get("__epoch").unwrap_or(0);
        out.push(HistoryRow {
            modified_date_epoch: epoch,
            row_uuid,
            values,
        });
    }
    out
}

/// Reads the current `public.<table>` rows, keyed by uuid.
async fn read_public(
    pool: &PgPool,
    table: &str,
    uuid_col: &str,
    columns: &[String],
) -> HashMap<Uuid, ColumnValues> {
    let sql = format!("SELECT {} FROM public.{table}", select_list(columns));
    let Ok(rows) = sqlx::query(&sql).fetch_all(pool).await else {
        return HashMap::new();
    };

    let mut out = HashMap::new();
    for row in &rows {
        use sqlx::Row;
        let mut values = ColumnValues::new();
        for col in columns {
            let v: Option<String> = row.try_get(col.as_str()).unwrap_or(None);
            values.insert(col.clone(), v);
        }
        if let Some(Some(uuid_str)) = values.get(uuid_col)
            && let Ok(uuid) = Uuid::parse_str(uuid_str)
        {
            out.insert(uuid, values);
        }
    }
    out
}

/// Looks up a column's value for SQL generation, falling back to an empty
/// string for a column that's simply absent from the map — the "Unknown/
/// missing values for NOT NULL columns are converted to empty strings"
/// edge case in §4.F.
fn quoted(values: &ColumnValues, col: &str) -> String {
    match values.get(col) {
        Some(Some(v)) => quoter::quote(Some(v)),
        Some(None) => quoter::quote(None),
        None => quoter::quote(Some("")),
    }
}

fn insert_sql(schema: &str, table: &str, columns: &[String], values: &ColumnValues) -> String {
    let cols = columns.join(", ");
    let vals = columns.iter().map(|c| quoted(values, c)).collect::<Vec<_>>().join(", ");
    quoter::fix_null_literals(&format!("INSERT INTO {schema}.{table} ({cols}) VALUES ({vals})"))
}

fn update_sql(table: &str, uuid_col: &str, columns: &[String], values: &ColumnValues) -> String {
    let set_clause = columns
        .iter()
        .filter(|c| c.as_str() != uuid_col)
        .map(|c| format!("{c} = {}", quoted(values, c)))
        .collect::<Vec<_>>()
        .join(", ");
    let uuid_value = quoted(values, uuid_col);
    quoter::fix_null_literals(&format!(
        "UPDATE public.{table} SET {set_clause} WHERE {uuid_col} = {uuid_value}"
    ))
}

/// Reconciles a single table across every connected peer, per §4.F steps
/// 4–6. Returns `(peer -> public statements, peer -> history statements)`.
async fn plan_table(
    ctx: &AnvilContext,
    table: &str,
) -> Option<(HashMap<Uuid, Vec<String>>, HashMap<Uuid, Vec<String>>)> {
    let mut peers: Vec<(Uuid, PgPool)> = ctx.peers().into_iter().map(|(u, h)| (u, h.pool)).collect();
    peers.sort_by_key(|(u, _)| *u);
    if peers.is_empty() {
        return None;
    }

    let (_, probe_pool) = &peers[0];
    let uuid_col = discover_uuid_column(probe_pool, table).await?;
    let columns = discover_value_columns(probe_pool, table).await;
    let host_col = host_uuid_column(probe_pool, table).await;

    let mut peer_history: HashMap<Uuid, Vec<HistoryRow>> = HashMap::new();
    let mut peer_public: HashMap<Uuid, HashMap<Uuid, ColumnValues>> = HashMap::new();
    for (peer_uuid, pool) in &peers {
        let history = read_history(pool, table, &uuid_col, &columns, host_col.as_deref(), ctx.local_host_uuid).await;
        let public = read_public(pool, table, &uuid_col, &columns).await;
        peer_history.insert(*peer_uuid, history);
        peer_public.insert(*peer_uuid, public);
    }

    // Per-peer lookup sets: every uuid this peer has ever seen, and every
    // exact (modified_date, uuid) pair present in this peer's history.
    let mut peer_exists: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    let mut peer_history_keys: HashMap<Uuid, HashSet<(i64, Uuid)>> = HashMap::new();
    for (peer_uuid, rows) in &peer_history {
        let exists = rows.iter().map(|r| r.row_uuid).collect();
        let keys = rows.iter().map(|r| (r.modified_date_epoch, r.row_uuid)).collect();
        peer_exists.insert(*peer_uuid, exists);
        peer_history_keys.insert(*peer_uuid, keys);
    }

    // Unify: merge every (modified_date, uuid) across peers, first peer
    // in stable (ascending UUID) order wins a tie (§4.F "Tie-break").
    let mut unified: HashMap<(i64, Uuid), ColumnValues> = HashMap::new();
    let mut unified_order: Vec<(i64, Uuid)> = Vec::new();
    for (_, rows) in peers.iter().map(|(u, _)| (*u, &peer_history[u])) {
        for row in rows {
            let key = (row.modified_date_epoch, row.row_uuid);
            if let std::collections::hash_map::Entry::Vacant(e) = unified.entry(key) {
                e.insert(row.values.clone());
                unified_order.push(key);
            }
        }
    }
    unified_order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut public_statements: HashMap<Uuid, Vec<String>> = peers.iter().map(|(u, _)| (*u, Vec::new())).collect();
    let mut history_statements: HashMap<Uuid, Vec<String>> = peers.iter().map(|(u, _)| (*u, Vec::new())).collect();
    let mut asked: HashMap<Uuid, HashSet<Uuid>> = peers.iter().map(|(u, _)| (*u, HashSet::new())).collect();

    for key @ (modified_date, row_uuid) in &unified_order {
        let proposed = &unified[key];

        for (peer_uuid, _) in &peers {
            let first_time = asked.get_mut(peer_uuid).unwrap().insert(*row_uuid);

            if first_time {
                if peer_exists[peer_uuid].contains(row_uuid) {
                    let current = peer_public.get(peer_uuid).and_then(|m| m.get(row_uuid));
                    if current != Some(proposed) {
                        public_statements
                            .get_mut(peer_uuid)
                            .unwrap()
                            .push(update_sql(table, &uuid_col, &columns, proposed));
                    }
                } else {
                    public_statements
                        .get_mut(peer_uuid)
                        .unwrap()
                        .push(insert_sql("public", table, &columns, proposed));
                }
            } else if !peer_history_keys[peer_uuid].contains(&(*modified_date, *row_uuid)) {
                history_statements
                    .get_mut(peer_uuid)
                    .unwrap()
                    .push(insert_sql("history", table, &columns, proposed));
            }
        }
    }

    Some((public_statements, history_statements))
}

/// Runs the Resync Engine for every table in [`CHECK_LIST`], building and
/// executing per-peer batches (public writes first, then history), then
/// clears the resync flag (§4.F step 7).
pub async fn run(ctx: &AnvilContext) {
    if !ctx.resync_needed() {
        return;
    }

    info!("resync starting");
    for &table in CHECK_LIST {
        let Some((public_statements, history_statements)) = plan_table(ctx, table).await else {
            continue;
        };

        for (peer_uuid, statements) in public_statements {
            if statements.is_empty() {
                continue;
            }
            debug!(table, peer = %peer_uuid, count = statements.len(), "resync public writes");
            let batch_size = ctx.config.database.maximum_batch_size;
            if let Err(e) =
                executor::execute_batch(ctx, Some(peer_uuid), Batch::Many(statements), batch_size).await
            {
                tracing::warn!(table, peer = %peer_uuid, error = %e, "resync public batch failed");
            }
        }
        for (peer_uuid, statements) in history_statements {
            if statements.is_empty() {
                continue;
            }
            debug!(table, peer = %peer_uuid, count = statements.len(), "resync history writes");
            let batch_size = ctx.config.database.maximum_batch_size;
            if let Err(e) =
                executor::execute_batch(ctx, Some(peer_uuid), Batch::Many(statements), batch_size).await
            {
                tracing::warn!(table, peer = %peer_uuid, error = %e, "resync history batch failed");
            }
        }
    }

    ctx.clear_resync_needed();
    info!("resync complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singularize_handles_every_check_list_table() {
        assert_eq!(singularize("hosts"), "host");
        assert_eq!(singularize("bridges"), "bridge");
        assert_eq!(singularize("bridge_interfaces"), "bridge_interface");
        assert_eq!(singularize("ip_addresses"), "ip_address");
        assert_eq!(singularize("ouis"), "oui");
        assert_eq!(singularize("mac_to_ip"), "mac_to_ip");
        assert_eq!(singularize("sessions"), "session");
        assert_eq!(singularize("variables"), "variable");
    }

    #[test]
    fn tie_break_first_peer_wins() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let row_uuid = Uuid::new_v4();

        let mut unified: HashMap<(i64, Uuid), ColumnValues> = HashMap::new();
        let mut peers_sorted = [a, b];
        peers_sorted.sort();

        let key = (1000i64, row_uuid);
        let mut first_values = ColumnValues::new();
        first_values.insert("x".to_string(), Some("from_a".to_string()));
        let mut second_values = ColumnValues::new();
        second_values.insert("x".to_string(), Some("from_b".to_string()));

        // Peer `a` is processed first (ascending uuid order); its value
        // must win and peer `b`'s later write must be rejected.
        unified.entry(key).or_insert(first_values.clone());
        let entry = unified.entry(key).or_insert(second_values);
        assert_eq!(entry.get("x"), first_values.get("x"));
    }

    #[test]
    fn null_and_missing_value_handling() {
        let mut values = ColumnValues::new();
        values.insert("a".to_string(), Some("x".to_string()));
        values.insert("b".to_string(), None);
        // "b" is explicitly NULL.
        assert_eq!(quoted(&values, "b"), "NULL");
        // "c" is absent entirely: falls back to empty string, not NULL.
        assert_eq!(quoted(&values, "c"), "''");
        assert_eq!(quoted(&values, "a"), "'x'");
    }
}
