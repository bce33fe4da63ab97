//! Meeting-point token derivation.
//!
//! Daily points are derived from the sorted pair of peer identities and the
//! UTC calendar date; hourly tokens are keyed by the pair's shared secret
//! and the UTC hour. Each derivation covers offsets −1, 0, +1 so two peers
//! registering near a boundary always share at least one token.
//!
//! Tokens are 22 URL-safe base64 characters with a `day_` or `hr_` prefix.
//! Both derivations are order-independent in the two identities.

use base64::Engine;
use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Prefix for daily meeting points.
pub const DAILY_PREFIX: &str = "day_";

/// Prefix for hourly tokens.
pub const HOURLY_PREFIX: &str = "hr_";

/// Token body length in base64 characters.
pub const TOKEN_LEN: usize = 22;

/// Domain separator for daily derivation.
const DAILY_DOMAIN: &[u8] = b"zajel:daily:";

/// Domain separator for hourly derivation.
const HOURLY_DOMAIN: &str = "zajel:hourly:";

type HmacSha256 = Hmac<Sha256>;

/// Derive the three daily meeting points (yesterday, today, tomorrow in
/// UTC) for a pair of identities.
///
/// `a` and `b` are the raw identity bytes — stable ids for current peers,
/// public keys for legacy peers. Sorting happens here, so argument order
/// does not matter.
pub fn derive_daily_points(a: &[u8], b: &[u8], today: NaiveDate) -> Vec<String> {
    let (first, second) = sort_pair(a, b);

    [-1i64, 0, 1]
        .iter()
        .map(|offset| {
            let date = shift_days(today, *offset);
            let mut hasher = Sha256::new();
            hasher.update(first);
            hasher.update(second);
            hasher.update(DAILY_DOMAIN);
            hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
            format!("{DAILY_PREFIX}{}", encode_token(&hasher.finalize()))
        })
        .collect()
}

/// Derive the three hourly tokens (previous, current, next UTC hour) from
/// the pair's shared secret.
pub fn derive_hourly_tokens(shared_secret: &[u8; 32], now: DateTime<Utc>) -> Vec<String> {
    let current_hour = hour_floor(now);

    [-1i64, 0, 1]
        .iter()
        .map(|offset| {
            let hour = current_hour + chrono::Duration::hours(*offset);
            let label = format!("{HOURLY_DOMAIN}{}", hour.format("%Y-%m-%dT%H"));
            let mut mac = HmacSha256::new_from_slice(shared_secret)
                .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
            mac.update(label.as_bytes());
            format!("{HOURLY_PREFIX}{}", encode_token(&mac.finalize().into_bytes()))
        })
        .collect()
}

/// Whether a token carries one of the meeting-point prefixes.
pub fn is_daily_token(token: &str) -> bool {
    token.starts_with(DAILY_PREFIX) && token.len() == DAILY_PREFIX.len() + TOKEN_LEN
}

/// Whether a token is an hourly token.
pub fn is_hourly_token(token: &str) -> bool {
    token.starts_with(HOURLY_PREFIX) && token.len() == HOURLY_PREFIX.len() + TOKEN_LEN
}

fn sort_pair<'a>(a: &'a [u8], b: &'a [u8]) -> (&'a [u8], &'a [u8]) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn shift_days(date: NaiveDate, offset: i64) -> NaiveDate {
    if offset >= 0 {
        date.checked_add_days(Days::new(offset as u64)).unwrap_or(date)
    } else {
        date.checked_sub_days(Days::new((-offset) as u64)).unwrap_or(date)
    }
}

fn hour_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn encode_token(digest: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    encoded.chars().take(TOKEN_LEN).collect()
}
