use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};

use crate::types::{Credentials, SignedRequest};

pub const SIGN_METHOD: &str = "HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `message` keyed by `secret`, as uppercase hex.
pub fn sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Builds the path+query target the cloud verifier recomputes.
///
/// Query parameters embedded in `path` are merged with `query` (explicit
/// entries win), sorted by key, joined as `key=value` with `&`, and the joined
/// string is percent-decoded once. Values always come from the merged map.
/// If the decoded bytes are not valid UTF-8 the joined string is kept as sent.
pub fn canonical_url(path: &str, query: &[(&str, &str)]) -> String {
    let (base, embedded) = match path.split_once('?') {
        Some((base, raw)) => (base, raw),
        None => (path, ""),
    };

    let mut merged: BTreeMap<&str, &str> = BTreeMap::new();
    for pair in embedded.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        merged.insert(key, value);
    }
    for &(key, value) in query {
        merged.insert(key, value);
    }

    if merged.is_empty() {
        return base.to_string();
    }

    let joined = merged
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    match percent_decode_str(&joined).decode_utf8() {
        Ok(decoded) => format!("{base}?{decoded}"),
        Err(_) => format!("{base}?{joined}"),
    }
}

pub fn string_to_sign(method: &str, body: &str, canonical_url: &str) -> String {
    format!(
        "{}\n{}\n\n{}",
        method.to_ascii_uppercase(),
        content_hash(body),
        canonical_url
    )
}

/// Signs one outgoing call. `token` is `None` only for token acquisition.
pub fn sign_request(
    credentials: &Credentials,
    token: Option<&str>,
    timestamp_ms: i64,
    method: &str,
    path: &str,
    query: &[(&str, &str)],
    body: &str,
) -> SignedRequest {
    let canonical_path = canonical_url(path, query);
    let timestamp = timestamp_ms.to_string();
    let message = format!(
        "{}{}{}{}",
        credentials.access_key,
        token.unwrap_or_default(),
        timestamp,
        string_to_sign(method, body, &canonical_path)
    );

    SignedRequest {
        timestamp,
        canonical_path,
        client_id: credentials.access_key.clone(),
        signature: sign(&credentials.secret_key, &message),
        sign_method: SIGN_METHOD,
        access_token: token.map(str::to_string),
    }
}
