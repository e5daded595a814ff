//! HMAC token minting and verification.
//!
//! Card tokens sign `(card_id, kind, expires_at_ms)`; webhook callbacks
//! sign `card_id|action|ts`. Verification is constant-time via the `Mac`
//! contract — never a string compare on hex digests.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str) -> HmacSha256 {
    // HMAC accepts keys of any length; new_from_slice only errors for
    // pathological internal states that cannot occur with SHA-256.
    HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts any key length")
}

/// Mint the signed token embedded in an outbound card.
pub fn mint_card_token(key: &str, card_id: &str, kind: &str, expires_at_ms: i64) -> String {
    let mut m = mac(key);
    m.update(card_id.as_bytes());
    m.update(b"|");
    m.update(kind.as_bytes());
    m.update(b"|");
    m.update(expires_at_ms.to_string().as_bytes());
    hex::encode(m.finalize().into_bytes())
}

/// Constant-time check of a presented card token.
pub fn verify_card_token(
    key: &str,
    card_id: &str,
    kind: &str,
    expires_at_ms: i64,
    presented_hex: &str,
) -> bool {
    let Ok(presented) = hex::decode(presented_hex) else {
        return false;
    };
    let mut m = mac(key);
    m.update(card_id.as_bytes());
    m.update(b"|");
    m.update(kind.as_bytes());
    m.update(b"|");
    m.update(expires_at_ms.to_string().as_bytes());
    m.verify_slice(&presented).is_ok()
}

/// Signature for the webhook callback body: `HMAC(card_id|action|ts)`.
pub fn sign_callback(key: &str, card_id: &str, action: &str, ts: i64) -> String {
    let mut m = mac(key);
    m.update(card_id.as_bytes());
    m.update(b"|");
    m.update(action.as_bytes());
    m.update(b"|");
    m.update(ts.to_string().as_bytes());
    hex::encode(m.finalize().into_bytes())
}

/// Constant-time check of the `X-Signature` header.
pub fn verify_callback(
    key: &str,
    card_id: &str,
    action: &str,
    ts: i64,
    presented_hex: &str,
) -> bool {
    let Ok(presented) = hex::decode(presented_hex) else {
        return false;
    };
    let mut m = mac(key);
    m.update(card_id.as_bytes());
    m.update(b"|");
    m.update(action.as_bytes());
    m.update(b"|");
    m.update(ts.to_string().as_bytes());
    m.verify_slice(&presented).is_ok()
}
