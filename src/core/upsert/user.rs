// src/core/upsert/user.rs

//! Upserter routine for `users`, natural-keyed on `user_name` (§3 User,
//! §4.D). A plaintext password is hashed by this routine; a pre-hashed
//! password (with its own salt/algorithm/iteration count) is taken as-is.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::User;
use crate::core::upsert::local_host_exists;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::{Argon2, Params};
use sqlx::PgPool;
use uuid::Uuid;

pub const DEFAULT_ALGORITHM: &str = "argon2id";
pub const DEFAULT_ITERATION_COUNT: i32 = 3;

/// Either a pre-hashed password (supplied with its own salt/algorithm/
/// iteration count) or plaintext to be hashed here (§3 User).
pub enum Password {
    Plaintext(String),
    PreHashed {
        hash: String,
        salt: String,
        algorithm: String,
        iteration_count: i32,
    },
}

pub struct UpsertUser<'a> {
    pub user_uuid: Option<Uuid>,
    pub user_name: &'a str,
    pub password: Password,
    pub language: &'a str,
    pub is_admin: bool,
    pub is_experienced: bool,
    pub is_trusted: bool,
}

fn validate(input: &UpsertUser<'_>) -> Result<()> {
    if input.user_name.trim().is_empty() {
        return Err(AnvilError::Config("user_name is required".to_string()));
    }
    if let Password::Plaintext(p) = &input.password
        && p.is_empty()
    {
        return Err(AnvilError::Config("password is required".to_string()));
    }
    Ok(())
}

/// Hashes a plaintext password with argon2id, generating a fresh salt.
fn hash_password(plaintext: &str) -> Result<(String, String)> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        Params::default(),
    );
    let hash = argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| AnvilError::Internal(format!("password hashing failed: {e}")))?;
    Ok((hash.to_string(), salt.as_str().to_string()))
}

/// True if `plaintext` hashes to the stored `stored_hash` under its own
/// embedded parameters. Used so an Upserter call submitting the same
/// plaintext as what's already stored hashes to nothing new and issues no
/// `UPDATE` (§8 idempotence law) — a random salt on every call would make
/// the freshly computed hash never match the stored one, even when the
/// password is unchanged.
fn plaintext_matches_stored(plaintext: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

pub async fn upsert_user(
    ctx: &AnvilContext,
    pool: &PgPool,
    input: UpsertUser<'_>,
) -> Result<Option<Uuid>> {
    validate(&input)?;

    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let existing = match input.user_uuid {
        Some(uuid) => sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await?,
        None => sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_name = $1")
            .bind(input.user_name)
            .fetch_optional(pool)
            .await?,
    };

    let (password_hash, salt, algorithm, iteration_count) = match &input.password {
        Password::Plaintext(plaintext) => {
            let unchanged = existing
                .as_ref()
                .is_some_and(|current| plaintext_matches_stored(plaintext, &current.user_password_hash));
            if unchanged {
                let current = existing.as_ref().unwrap();
                (
                    current.user_password_hash.clone(),
                    current.user_salt.clone(),
                    current.user_algorithm.clone(),
                    current.user_iteration_count,
                )
            } else {
                let (hash, salt) = hash_password(plaintext)?;
                (hash, salt, DEFAULT_ALGORITHM.to_string(), DEFAULT_ITERATION_COUNT)
            }
        }
        Password::PreHashed {
            hash,
            salt,
            algorithm,
            iteration_count,
        } => (hash.clone(), salt.clone(), algorithm.clone(), *iteration_count),
    };

    let now = ctx.refresh().await?;

    let Some(current) = existing else {
        let uuid = input.user_uuid.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO users
                (user_uuid, user_name, user_password_hash, user_salt, user_algorithm,
                 user_iteration_count, user_language, user_is_admin, user_is_experienced,
                 user_is_trusted, modified_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(uuid)
        .bind(input.user_name)
        .bind(&password_hash)
        .bind(&salt)
        .bind(&algorithm)
        .bind(iteration_count)
        .bind(input.language)
        .bind(input.is_admin)
        .bind(input.is_experienced)
        .bind(input.is_trusted)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(Some(uuid));
    };

    let proposed = User {
        user_uuid: current.user_uuid,
        user_name: input.user_name.to_string(),
        user_password_hash: password_hash,
        user_salt: salt,
        user_algorithm: algorithm,
        user_iteration_count: iteration_count,
        user_language: input.language.to_string(),
        user_is_admin: input.is_admin,
        user_is_experienced: input.is_experienced,
        user_is_trusted: input.is_trusted,
        modified_date: current.modified_date,
    };

    if current.value_columns_equal(&proposed) {
        return Ok(Some(current.user_uuid));
    }

    sqlx::query(
        "UPDATE users SET user_name = $1, user_password_hash = $2, user_salt = $3, user_algorithm = $4,
                user_iteration_count = $5, user_language = $6, user_is_admin = $7,
                user_is_experienced = $8, user_is_trusted = $9, modified_date = $10
         WHERE user_uuid = $11",
    )
    .bind(&proposed.user_name)
    .bind(&proposed.user_password_hash)
    .bind(&proposed.user_salt)
    .bind(&proposed.user_algorithm)
    .bind(proposed.user_iteration_count)
    .bind(&proposed.user_language)
    .bind(proposed.user_is_admin)
    .bind(proposed.user_is_experienced)
    .bind(proposed.user_is_trusted)
    .bind(now)
    .bind(current.user_uuid)
    .execute(pool)
    .await?;

    Ok(Some(current.user_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_username() {
        let input = UpsertUser {
            user_uuid: None,
            user_name: "",
            password: Password::Plaintext("hunter2".to_string()),
            language: "en_CA",
            is_admin: false,
            is_experienced: false,
            is_trusted: false,
        };
        assert!(validate(&input).is_err());
    }

    #[test]
    fn rejects_empty_plaintext_password() {
        let input = UpsertUser {
            user_uuid: None,
            user_name: "alteeve",
            password: Password::Plaintext(String::new()),
            language: "en_CA",
            is_admin: false,
            is_experienced: false,
            is_trusted: false,
        };
        assert!(validate(&input).is_err());
    }

    #[test]
    fn hashing_produces_distinct_salts() {
        let (hash_a, salt_a) = hash_password("hunter2").unwrap();
        let (hash_b, salt_b) = hash_password("hunter2").unwrap();
        assert_ne!(salt_a, salt_b);
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn unchanged_plaintext_matches_despite_fresh_salt_on_rehash() {
        let (hash, _salt) = hash_password("hunter2").unwrap();
        assert!(plaintext_matches_stored("hunter2", &hash));
        assert!(!plaintext_matches_stored("wrong-password", &hash));
    }
}
