// src/core/drift.rs

//! Component E: the Drift Detector (§4.E). For every synced table, on
//! every connected peer, computes `(last_updated, row_count)` and marks
//! any peer strictly behind the maximum across peers. Never blocks on a
//! lagging peer — it only records findings; the Resync Engine acts on
//! them.

use crate::core::context::AnvilContext;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

/// Every synced table, `states` exempted per §3/§4.E ("the only synced
/// table exempt from cross-host resync").
pub const CHECK_LIST: &[&str] = &[
    "hosts",
    "users",
    "variables",
    "jobs",
    "alerts",
    "network_interfaces",
    "bonds",
    "bridges",
    "bridge_interfaces",
    "ip_addresses",
    "files",
    "file_locations",
    "ouis",
    "mac_to_ip",
    "sessions",
];

/// Per-table drift findings for one check run.
#[derive(Debug, Clone, Default)]
pub struct TableDrift {
    pub table: String,
    pub last_updated: HashMap<Uuid, i64>,
    pub row_count: HashMap<Uuid, i64>,
    pub behind: HashSet<Uuid>,
}

/// The full report produced by one [`run`] call.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub tables: Vec<TableDrift>,
    pub behind_peers: HashSet<Uuid>,
}

async fn table_exists(pool: &PgPool, schema: &str, table: &str) -> bool {
    sqlx::query_as::<_, (bool,)>(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables
         WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(pool)
    .await
    .map(|(exists,)| exists)
    .unwrap_or(false)
}

/// Finds a `*_host_uuid` column on the table, if one exists (§4.E step 2).
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

/// Probes one table on one peer: `(last_updated_epoch, row_count)`,
/// preferring the history schema over public when both exist (§4.E
/// steps 3–4).
async fn probe(pool: &PgPool, table: &str, local_host_uuid: Uuid) -> Option<(i64, i64)> {
    if !table_exists(pool, "public", table).await {
        return None;
    }

    let host_col = host_uuid_column(pool, table).await;
    let use_history = table_exists(pool, "history", table).await;
    let schema = if use_history { "history" } else { "public" };

    let mut sql = format!("SELECT round(extract(epoch FROM modified_date))::bigint FROM {schema}.{table}");
    if let Some(col) = &host_col {
        sql.push_str(&format!(" WHERE {col} = '{local_host_uuid}'"));
    }
    sql.push_str(" ORDER BY 1 DESC");

    let timestamps: Vec<(i64,)> = sqlx::query_as(&sql).fetch_all(pool).await.ok()?;
    let row_count = timestamps.len() as i64;
    let last_updated = timestamps.first().map(|(t,)| *t).unwrap_or(0);
    Some((last_updated, row_count))
}

/// Runs the Drift Detector across every connected peer and every table in
/// [`CHECK_LIST`]. Sets [`AnvilContext::set_resync_needed`] and demotes
/// the current reader if it's found lagging (§4.E).
pub async fn run(ctx: &AnvilContext) -> DriftReport {
    let mut report = DriftReport::default();
    let peers = ctx.peers();

    for &table in CHECK_LIST {
        let mut drift = TableDrift {
            table: table.to_string(),
            ..Default::default()
        };

        for (&uuid, handle) in &peers {
            if let Some((last_updated, row_count)) = probe(&handle.pool, table, ctx.local_host_uuid).await {
                drift.last_updated.insert(uuid, last_updated);
                drift.row_count.insert(uuid, row_count);
            }
        }

        let max_updated = drift.last_updated.values().copied().max().unwrap_or(0);
        let max_rows = drift.row_count.values().copied().max().unwrap_or(0);

        for &uuid in drift.last_updated.keys() {
            let updated = drift.last_updated[&uuid];
            let rows = drift.row_count[&uuid];
            if updated < max_updated || rows < max_rows {
                drift.behind.insert(uuid);
                report.behind_peers.insert(uuid);
            }
        }

        if !drift.behind.is_empty() {
            debug!(table, behind = ?drift.behind, "drift detected");
        }
        report.tables.push(drift);
    }

    if !report.behind_peers.is_empty() {
        ctx.set_resync_needed();
        if let Some(reader) = ctx.reader()
            && report.behind_peers.contains(&reader)
        {
            ctx.promote_any_reader();
        }
        info!(peers = ?report.behind_peers, "peers marked behind, resync flagged");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagging_peer_is_marked_behind() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut drift = TableDrift {
            table: "jobs".to_string(),
            ..Default::default()
        };
        drift.last_updated.insert(a, 100);
        drift.last_updated.insert(b, 50);
        drift.row_count.insert(a, 10);
        drift.row_count.insert(b, 10);

        let max_updated = drift.last_updated.values().copied().max().unwrap();
        for &uuid in drift.last_updated.keys() {
            if drift.last_updated[&uuid] < max_updated {
                drift.behind.insert(uuid);
            }
        }

        assert!(drift.behind.contains(&b));
        assert!(!drift.behind.contains(&a));
    }

    #[test]
    fn equal_peers_have_no_drift() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut last_updated = HashMap::new();
        last_updated.insert(a, 100);
        last_updated.insert(b, 100);
        let max_updated = last_updated.values().copied().max().unwrap();
        assert!(last_updated.values().all(|&v| v == max_updated));
    }

    #[test]
    fn check_list_excludes_states() {
        assert!(!CHECK_LIST.contains(&"states"));
    }
}
