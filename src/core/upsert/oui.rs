// src/core/upsert/oui.rs

//! Upserter routines for the two lookup tables used by network discovery:
//! `ouis` (IEEE OUI-prefix → vendor, natural-keyed on `oui_mac_prefix`) and
//! `mac_to_ip` (observed MAC→IP pairings, natural-keyed on `mac_to_ip_mac_address`,
//! §3).

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::{MacToIp, Oui};
use crate::core::upsert::local_host_exists;
use crate::core::validate::validate_mac;
use sqlx::PgPool;
use uuid::Uuid;

pub struct UpsertOui<'a> {
    pub oui_uuid: Option<Uuid>,
    pub mac_prefix: &'a str,
    pub vendor: &'a str,
}

fn validate_oui(input: &UpsertOui<'_>) -> Result<()> {
    if input.mac_prefix.trim().is_empty() {
        return Err(AnvilError::Config("oui mac_prefix is required".to_string()));
    }
    Ok(())
}

pub async fn upsert_oui(ctx: &AnvilContext, pool: &PgPool, input: UpsertOui<'_>) -> Result<Option<Uuid>> {
    validate_oui(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.oui_uuid {
        Some(uuid) => sqlx::query_as::<_, Oui>("SELECT * FROM ouis WHERE oui_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, Oui>("SELECT * FROM ouis WHERE oui_mac_prefix = $1")
            .bind(input.mac_prefix)
            .fetch_optional(pool)
            .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.oui_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO ouis (oui_uuid, oui_mac_prefix, oui_vendor, modified_date) VALUES ($1, $2, $3, $4)",
        )
        .bind(uuid)
        .bind(input.mac_prefix)
        .bind(input.vendor)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = Oui {
        oui_uuid: current.oui_uuid,
        oui_mac_prefix: input.mac_prefix.to_string(),
        oui_vendor: input.vendor.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.oui_uuid));
    }

    sqlx::query("UPDATE ouis SET oui_mac_prefix = $1, oui_vendor = $2, modified_date = $3 WHERE oui_uuid = $4")
        .bind(&proposed.oui_mac_prefix)
        .bind(&proposed.oui_vendor)
        .bind(now)
        .bind(current.oui_uuid)
        .execute(pool)
        .await?;

    Ok(Some(current.oui_uuid))
}

pub struct UpsertMacToIp<'a> {
    pub mac_to_ip_uuid: Option<Uuid>,
    pub mac_address: &'a str,
    pub ip_address: &'a str,
}

pub async fn upsert_mac_to_ip(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertMacToIp<'_>,
) -> Result<Option<Uuid>> {
    let mac = validate_mac(input.mac_address)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.mac_to_ip_uuid {
        Some(uuid) => sqlx::query_as::<_, MacToIp>("SELECT * FROM mac_to_ip WHERE mac_to_ip_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, MacToIp>("SELECT * FROM mac_to_ip WHERE mac_to_ip_mac_address = $1")
            .bind(&mac)
            .fetch_optional(pool)
            .await?,
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.mac_to_ip_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO mac_to_ip (mac_to_ip_uuid, mac_to_ip_mac_address, mac_to_ip_ip_address, modified_date)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(uuid)
        .bind(&mac)
        .bind(input.ip_address)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = MacToIp {
        mac_to_ip_uuid: current.mac_to_ip_uuid,
        mac_to_ip_mac_address: mac,
        mac_to_ip_ip_address: input.ip_address.to_string(),
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.mac_to_ip_uuid));
    }

    sqlx::query(
        "UPDATE mac_to_ip SET mac_to_ip_mac_address = $1, mac_to_ip_ip_address = $2, modified_date = $3
         WHERE mac_to_ip_uuid = $4",
    )
    .bind(&proposed.mac_to_ip_mac_address)
    .bind(&proposed.mac_to_ip_ip_address)
    .bind(now)
    .bind(current.mac_to_ip_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.mac_to_ip_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_mac_prefix() {
        let input = UpsertOui {
            oui_uuid: None,
            mac_prefix: "",
            vendor: "Acme",
        };
        assert!(validate_oui(&input).is_err());
    }

    #[test]
    fn mac_to_ip_validates_mac_shape() {
        assert!(validate_mac("00:1A:2B").is_err());
        assert!(validate_mac("00:1A:2B:3C:4D:5E").is_ok());
    }
}
