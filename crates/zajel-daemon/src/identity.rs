//! Device identity bootstrap.
//!
//! The stable id lives in the plain `identity` row so it survives
//! secure-storage corruption; the X25519 secret is stored raw or wrapped
//! under an Argon2id passphrase. A wrapped secret with no passphrase at
//! startup is a hard failure — there is no recovery path besides the
//! user-held seed phrase.

use anyhow::{bail, Context};
use rusqlite::Connection;
use tracing::info;

use zajel_crypto::x25519::X25519StaticSecret;
use zajel_crypto::{argon2id, generate_identity};
use zajel_types::identity::StableId;

/// The device identity, loaded or freshly generated.
pub struct DeviceIdentity {
    pub stable_id: StableId,
    pub secret: X25519StaticSecret,
}

/// Load the identity, generating and persisting one on first run.
pub fn load_or_generate(
    conn: &Connection,
    passphrase: Option<&str>,
) -> anyhow::Result<DeviceIdentity> {
    let existing = conn
        .query_row(
            "SELECT stable_id, secret_blob, wrapped FROM identity WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some((stable_hex, blob, wrapped)) = existing {
        let stable_id =
            StableId::from_hex(&stable_hex).context("persisted stable id is corrupt")?;
        let blob = blob.context("identity row has no secret")?;

        let secret_bytes: [u8; 32] = if wrapped {
            let passphrase = match passphrase {
                Some(p) => p,
                None => bail!("identity is passphrase-wrapped but no passphrase was provided"),
            };
            argon2id::unwrap(passphrase.as_bytes(), &blob)
                .context("failed to unwrap identity")?
                .try_into()
                .map_err(|_| anyhow::anyhow!("unwrapped identity has wrong length"))?
        } else {
            blob.try_into()
                .map_err(|_| anyhow::anyhow!("stored identity has wrong length"))?
        };

        return Ok(DeviceIdentity {
            stable_id,
            secret: X25519StaticSecret::from_bytes(secret_bytes),
        });
    }

    // First run: generate and persist.
    let (secret, stable_id) = generate_identity();
    info!(stable_id = %stable_id, "generated new device identity");

    let (blob, wrapped) = match passphrase {
        Some(p) => (argon2id::wrap(p.as_bytes(), &secret.to_bytes())?, true),
        None => (secret.to_bytes().to_vec(), false),
    };

    conn.execute(
        "INSERT INTO identity (id, stable_id, secret_blob, wrapped, created_at)
         VALUES (1, ?1, ?2, ?3, ?4)",
        rusqlite::params![stable_id.to_hex(), blob, wrapped, unix_now() as i64],
    )?;

    Ok(DeviceIdentity { stable_id, secret })
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
