//! Bootstrap discovery client.
//!
//! Fetches `GET /servers` and verifies the signature against the pinned
//! bootstrap key. Every failure path returns an empty list after a WARN
//! log — an empty result is distinguishable from "no servers registered"
//! only by that log line, so the log is part of the contract. There is no
//! unsigned fallback, in dev builds or otherwise.

use tracing::warn;

use zajel_crypto::ed25519::{Signature, VerifyingKey};
use zajel_types::bootstrap::{signable_bytes, ServerEntry, SignedServerList};

/// Verify a signed server list against the pinned key.
///
/// Entries that fail field validation are rejected wholesale — a list
/// that was signed over invalid entries is a broken bootstrap server.
pub fn verify_server_list(
    list: &SignedServerList,
    pinned: &VerifyingKey,
) -> Result<Vec<ServerEntry>, String> {
    let signable = signable_bytes(&list.servers).map_err(|e| e.to_string())?;
    let signature = Signature::from_hex(&list.signature).map_err(|e| e.to_string())?;
    pinned
        .verify(&signable, &signature)
        .map_err(|e| e.to_string())?;

    for entry in &list.servers {
        entry.validate().map_err(|e| e.to_string())?;
    }
    Ok(list.servers.clone())
}

/// Fetch and verify the server list.
///
/// Returns `[]` on any failure, with the reason logged at WARN.
pub async fn discover_servers(
    http: &reqwest::Client,
    bootstrap_url: &str,
    pinned: &VerifyingKey,
) -> Vec<ServerEntry> {
    let url = format!("{}/servers", bootstrap_url.trim_end_matches('/'));

    let response = match http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, %url, "bootstrap fetch failed; returning empty server list");
            return Vec::new();
        }
    };

    if !response.status().is_success() {
        warn!(status = %response.status(), %url, "bootstrap returned an error; returning empty server list");
        return Vec::new();
    }

    let list: SignedServerList = match response.json().await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "bootstrap response malformed; returning empty server list");
            return Vec::new();
        }
    };

    match verify_server_list(&list, pinned) {
        Ok(servers) => servers,
        Err(e) => {
            // Hard fail: a bad signature never degrades to unsigned use.
            warn!(error = %e, "bootstrap signature invalid; returning empty server list");
            Vec::new()
        }
    }
}
