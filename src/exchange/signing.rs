use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const SIGNATURE_HEADER: &str = "X-API-SIGNATURE";
pub const TIMESTAMP_HEADER: &str = "X-API-TIMESTAMP";

/// Hex HMAC-SHA512 over `timestamp || METHOD || path || body`. `path`
/// includes the query string; `body` is empty for requests without one.
pub fn sign_request(secret: &str, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
