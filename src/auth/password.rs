//! Argon2id credential hashing.
//!
//! The sync functions do the work; `hash` and `verify` move it onto the
//! blocking pool so request handlers never run Argon2 on a runtime worker.

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

fn argon2_error(op: &'static str) -> impl Fn(argon2::password_hash::Error) -> anyhow::Error {
    move |e| {
        error!(error = %e, op, "argon2 error");
        anyhow::anyhow!("{op}: {e}")
    }
}

/// PHC string for `plain` with a fresh random salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(argon2_error("hash"))?
        .to_string())
}

/// `Ok(false)` on mismatch; `Err` only when `phc` is not a valid hash.
pub fn verify_password(plain: &str, phc: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(argon2_error("parse hash"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

pub async fn hash(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("hash task panicked")?
}

pub async fn verify(plain: String, phc: impl Into<String>) -> anyhow::Result<bool> {
    let phc = phc.into();
    tokio::task::spawn_blocking(move || verify_password(&plain, &phc))
        .await
        .context("verify task panicked")?
}
