use sha2::{Digest, Sha256};

const PREFIX: &str = "zo";

fn hex_digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Request checksum derived from the session token.
///
/// The token is split on `.`; the header part, the payload part and the whole
/// token are hashed independently and truncated to fixed widths. A token
/// without separators hashes missing parts as empty strings.
pub fn checksum(token: &str) -> String {
    let mut parts = token.split('.');
    let header = parts.next().unwrap_or_default();
    let payload = parts.next().unwrap_or_default();

    let payload_digest = hex_digest(payload);
    format!(
        "{PREFIX}{}{}/{}{}",
        hex_digest(header),
        &payload_digest[..30],
        payload_digest,
        &hex_digest(token)[..24]
    )
}
