//! The daemon's HTTP surface: the four Blossom blob endpoints from §6
//! (`PUT /upload`, `HEAD`/`GET`/`DELETE /{hex}.bin`), `/api/peers`, and a
//! bare health check. Every write checks a BUD-02-style `Authorization:
//! Nostr <event>` header against `AppState::allowed_pubkeys`/
//! `public_writes`, mirroring `hashtree_blossom::signer::NostrKeysSigner`'s
//! client-side scheme from the other end.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hashtree_core::{from_hex, hash::sha256, store::Store, to_hex};
use serde_json::json;

use super::auth::AppState;

const BLOSSOM_AUTH_KIND: u16 = 24242;

/// Verifies the `Authorization: Nostr <base64 event>` header against
/// `verb`/`hash_hex`, returning the signing pubkey (hex) on success.
fn verify_auth_header(headers: &HeaderMap, verb: &str, hash_hex: &str) -> Option<String> {
    use base64::Engine;
    use nostr::{Alphabet, JsonUtil, Kind, SingleLetterTag};

    let header = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let encoded = header.strip_prefix("Nostr ")?;
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let event = nostr::Event::from_json(json).ok()?;

    event.verify().ok()?;

    if event.kind != Kind::Custom(BLOSSOM_AUTH_KIND) {
        return None;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();

    let tag_value = |name: &str| -> Option<String> {
        event.tags.iter().find_map(|t| {
            let vec = t.as_vec();
            if vec.first().map(|k| k.as_str()) == Some(name) {
                vec.get(1).cloned()
            } else {
                None
            }
        })
    };

    let expiration: u64 = tag_value("expiration")?.parse().ok()?;
    if expiration < now {
        return None;
    }

    if tag_value("t")?.to_lowercase() != verb.to_lowercase() {
        return None;
    }

    let x_key = SingleLetterTag::lowercase(Alphabet::X).to_string();
    if tag_value(&x_key)? != hash_hex {
        return None;
    }

    Some(event.pubkey.to_hex())
}

fn is_write_allowed(state: &AppState, pubkey_hex: &str) -> bool {
    state.public_writes || state.allowed_pubkeys.contains(pubkey_hex)
}

pub async fn upload_blob(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if body.len() > state.max_upload_bytes {
        return (StatusCode::PAYLOAD_TOO_LARGE, "blob exceeds max upload size").into_response();
    }

    let hash = sha256(&body);
    let hex = to_hex(&hash);

    let Some(pubkey) = verify_auth_header(&headers, "PUT", &hex) else {
        return (StatusCode::UNAUTHORIZED, "missing or invalid auth event").into_response();
    };
    if !is_write_allowed(&state, &pubkey) {
        return (StatusCode::FORBIDDEN, "pubkey not permitted to write").into_response();
    }

    match state.store.put(&hash, body.to_vec()).await {
        Ok(true) => (StatusCode::CREATED, Json(json!({ "hash": hex }))).into_response(),
        Ok(false) => StatusCode::CONFLICT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn parse_hash_from_bin_path(raw: &str) -> Option<hashtree_core::Hash> {
    let hex_part = raw.strip_suffix(".bin").unwrap_or(raw);
    from_hex(hex_part).ok()
}

pub async fn head_blob(State(state): State<AppState>, Path(raw): Path<String>) -> StatusCode {
    let Some(hash) = parse_hash_from_bin_path(&raw) else {
        return StatusCode::BAD_REQUEST;
    };
    match state.store.has(&hash).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn get_blob(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let Some(hash) = parse_hash_from_bin_path(&raw) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.get(&hash).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
            Body::from(bytes),
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn delete_blob(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Response {
    let Some(hash) = parse_hash_from_bin_path(&raw) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let hex = to_hex(&hash);

    let Some(pubkey) = verify_auth_header(&headers, "DELETE", &hex) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !is_write_allowed(&state, &pubkey) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.store.delete(&hash).await {
        Ok(existed) => Json(json!({ "deleted": existed })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Minimal overhead health check - if we can respond, we're alive.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Connected P2P peers, the shape the CLI's `peers` command consumes.
pub async fn api_peers(State(state): State<AppState>) -> impl IntoResponse {
    let Some(ref exchange) = state.exchange else {
        return Json(json!({
            "enabled": false,
            "peers": [],
        }));
    };

    let peers = exchange.peers().await;
    let peer_list: Vec<_> = peers
        .iter()
        .map(|p| {
            json!({
                "pubkey": p.identity,
                "pool": format!("{:?}", p.pool),
                "state": "connected",
            })
        })
        .collect();

    Json(json!({
        "enabled": true,
        "peers": peer_list,
    }))
}
