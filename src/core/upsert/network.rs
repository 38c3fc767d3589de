// src/core/upsert/network.rs

//! Upserter routines for the network graph: `network_interfaces`, `bonds`,
//! `bridges`, `bridge_interfaces`, `ip_addresses` (§3). Natural keys:
//! interfaces by MAC address, bonds/bridges by `(host_uuid, name)`,
//! bridge_interfaces by `(bridge_uuid, network_interface_uuid)`, and
//! ip_addresses have no natural key beyond their UUID — a new address is
//! always a new row; "deletion" sets `ip_address_address` to the `"0"`
//! sentinel via a normal update (§3 Network graph, §9 Open Questions).

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::{Bond, Bridge, BridgeInterface, IpAddress, NetworkInterface};
use crate::core::upsert::local_host_exists;
use crate::core::validate::validate_mac;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertNetworkInterface<'a> {
    pub network_interface_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub mac_address: &'a str,
    pub name: &'a str,
    pub bond_uuid: Option<Uuid>,
    pub bridge_uuid: Option<Uuid>,
}

pub async fn upsert_network_interface(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertNetworkInterface<'_>,
) -> Result<Option<Uuid>> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("interface name is required".to_string()));
    }
    if input.bond_uuid.is_some() && input.bridge_uuid.is_some() {
        return Err(AnvilError::Config(
            "an interface may reference at most one of {bond, bridge}".to_string(),
        ));
    }
    let mac = validate_mac(input.mac_address)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.network_interface_uuid {
        Some(uuid) => sqlx::query_as::<_, NetworkInterface>(
            "SELECT * FROM network_interfaces WHERE network_interface_uuid = $1",
        )
        .bind(uuid)
        .fetch_optional(pool)
        .await?,
        None => sqlx::query_as::<_, NetworkInterface>(
            "SELECT * FROM network_interfaces WHERE network_interface_mac_address = $1",
        )
        .bind(&mac)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.network_interface_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO network_interfaces
                (network_interface_uuid, network_interface_host_uuid, network_interface_mac_address,
                 network_interface_name, network_interface_bond_uuid, network_interface_bridge_uuid,
                 modified_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(&mac)
        .bind(input.name)
        .bind(input.bond_uuid)
        .bind(input.bridge_uuid)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = NetworkInterface {
        network_interface_uuid: current.network_interface_uuid,
        network_interface_host_uuid: input.host_uuid,
        network_interface_mac_address: mac,
        network_interface_name: input.name.to_string(),
        network_interface_bond_uuid: input.bond_uuid,
        network_interface_bridge_uuid: input.bridge_uuid,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.network_interface_uuid));
    }

    sqlx::query(
        "UPDATE network_interfaces
         SET network_interface_host_uuid = $1, network_interface_mac_address = $2,
             network_interface_name = $3, network_interface_bond_uuid = $4,
             network_interface_bridge_uuid = $5, modified_date = $6
         WHERE network_interface_uuid = $7",
    )
    .bind(proposed.network_interface_host_uuid)
    .bind(&proposed.network_interface_mac_address)
    .bind(&proposed.network_interface_name)
    .bind(proposed.network_interface_bond_uuid)
    .bind(proposed.network_interface_bridge_uuid)
    .bind(now)
    .bind(current.network_interface_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.network_interface_uuid))
}

pub struct UpsertBond<'a> {
    pub bond_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub name: &'a str,
    pub mode: &'a str,
}

pub async fn upsert_bond(ctx: &AnvilContext, pool: &PgPool, input: UpsertBond<'_>) -> Result<Option<Uuid>> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("bond name is required".to_string()));
    }
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.bond_uuid {
        Some(uuid) => sqlx::query_as::<_, Bond>("SELECT * FROM bonds WHERE bond_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, Bond>("SELECT * FROM bonds WHERE bond_host_uuid = $1 AND bond_name = $2")
            .bind(input.host_uuid)
            .bind(input.name)
            .fetch_optional(pool)
            .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.bond_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO bonds (bond_uuid, bond_host_uuid, bond_name, bond_mode, modified_date)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.name)
        .bind(input.mode)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Bond {
        bond_uuid: current.bond_uuid,
        bond_host_uuid: input.host_uuid,
        bond_name: input.name.to_string(),
        bond_mode: input.mode.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.bond_uuid));
    }

    sqlx::query(
        "UPDATE bonds SET bond_host_uuid = $1, bond_name = $2, bond_mode = $3, modified_date = $4
         WHERE bond_uuid = $5",
    )
    .bind(proposed.bond_host_uuid)
    .bind(&proposed.bond_name)
    .bind(&proposed.bond_mode)
    .bind(now)
    .bind(current.bond_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.bond_uuid))
}

pub struct UpsertBridge<'a> {
    pub bridge_uuid: Option<Uuid>,
    pub host_uuid: Uuid,
    pub name: &'a str,
}

pub async fn upsert_bridge(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertBridge<'_>,
) -> Result<Option<Uuid>> {
    if input.name.trim().is_empty() {
        return Err(AnvilError::Config("bridge name is required".to_string()));
    }
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.bridge_uuid {
        Some(uuid) => sqlx::query_as::<_, Bridge>("SELECT * FROM bridges WHERE bridge_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, Bridge>(
            "SELECT * FROM bridges WHERE bridge_host_uuid = $1 AND bridge_name = $2",
        )
        .bind(input.host_uuid)
        .bind(input.name)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.bridge_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO bridges (bridge_uuid, bridge_host_uuid, bridge_name, modified_date)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(uuid)
        .bind(input.host_uuid)
        .bind(input.name)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Bridge {
        bridge_uuid: current.bridge_uuid,
        bridge_host_uuid: input.host_uuid,
        bridge_name: input.name.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.bridge_uuid));
    }

    sqlx::query("UPDATE bridges SET bridge_host_uuid = $1, bridge_name = $2, modified_date = $3 WHERE bridge_uuid = $4")
        .bind(proposed.bridge_host_uuid)
        .bind(&proposed.bridge_name)
        .bind(now)
        .bind(current.bridge_uuid)
        .execute(pool)
        .await?;

    Ok(Some(current.bridge_uuid))
}

pub struct UpsertBridgeInterface {
    pub bridge_interface_uuid: Option<Uuid>,
    pub bridge_uuid: Uuid,
    pub network_interface_uuid: Uuid,
}

pub async fn upsert_bridge_interface(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertBridgeInterface,
) -> Result<Option<Uuid>> {
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.bridge_interface_uuid {
        Some(uuid) => sqlx::query_as::<_, BridgeInterface>(
            "SELECT * FROM bridge_interfaces WHERE bridge_interface_uuid = $1",
        )
        .bind(uuid)
        .fetch_optional(pool)
        .await?,
        None => sqlx::query_as::<_, BridgeInterface>(
            "SELECT * FROM bridge_interfaces
             WHERE bridge_interface_bridge_uuid = $1 AND bridge_interface_network_interface_uuid = $2",
        )
        .bind(input.bridge_uuid)
        .bind(input.network_interface_uuid)
        .fetch_optional(pool)
        .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.bridge_interface_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO bridge_interfaces
                (bridge_interface_uuid, bridge_interface_bridge_uuid,
                 bridge_interface_network_interface_uuid, modified_date)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(uuid)
        .bind(input.bridge_uuid)
        .bind(input.network_interface_uuid)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    // Both value columns are the natural key itself; nothing can differ
    // without it being a different row, so this routine never updates.
    Ok(Some(current.bridge_interface_uuid))
}

pub struct UpsertIpAddress<'a> {
    pub ip_address_uuid: Option<Uuid>,
    pub address: &'a str,
    pub subnet_mask: &'a str,
    pub on_type: &'a str,
    pub on_uuid: Uuid,
}

pub async fn upsert_ip_address(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertIpAddress<'_>,
) -> Result<Option<Uuid>> {
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.ip_address_uuid {
        Some(uuid) => {
            sqlx::query_as::<_, IpAddress>("SELECT * FROM ip_addresses WHERE ip_address_uuid = $1")
                .bind(uuid)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.ip_address_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO ip_addresses
                (ip_address_uuid, ip_address_address, ip_address_subnet_mask,
                 ip_address_on_type, ip_address_on_uuid, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuid)
        .bind(input.address)
        .bind(input.subnet_mask)
        .bind(input.on_type)
        .bind(input.on_uuid)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = IpAddress {
        ip_address_uuid: current.ip_address_uuid,
        ip_address_address: input.address.to_string(),
        ip_address_subnet_mask: input.subnet_mask.to_string(),
        ip_address_on_type: input.on_type.to_string(),
        ip_address_on_uuid: input.on_uuid,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.ip_address_uuid));
    }

    sqlx::query(
        "UPDATE ip_addresses SET ip_address_address = $1, ip_address_subnet_mask = $2,
                ip_address_on_type = $3, ip_address_on_uuid = $4, modified_date = $5
         WHERE ip_address_uuid = $6",
    )
    .bind(&proposed.ip_address_address)
    .bind(&proposed.ip_address_subnet_mask)
    .bind(&proposed.ip_address_on_type)
    .bind(proposed.ip_address_on_uuid)
    .bind(now)
    .bind(current.ip_address_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.ip_address_uuid))
}

/// Marks an IP address deleted by writing the `"0"` sentinel (§3, §9 Open
/// Questions) rather than removing the row.
pub async fn delete_ip_address(ctx: &AnvilContext, pool: &PgPool, ip_address_uuid: Uuid) -> Result<()> {
    let current = sqlx::query_as::<_, IpAddress>("SELECT * FROM ip_addresses WHERE ip_address_uuid = $1")
        .bind(ip_address_uuid)
        .fetch_optional(pool)
        .await?
        .ok_or(AnvilError::RowNotFound {
            table: "ip_addresses".to_string(),
            uuid: ip_address_uuid,
        })?;

    upsert_ip_address(
        ctx,
        pool,
        UpsertIpAddress {
            ip_address_uuid: Some(ip_address_uuid),
            address: crate::core::model::IP_ADDRESS_DELETED,
            subnet_mask: &current.ip_address_subnet_mask,
            on_type: &current.ip_address_on_type,
            on_uuid: current.ip_address_on_uuid,
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_validated_before_any_query() {
        assert!(validate_mac("not-a-mac").is_err());
    }
}
