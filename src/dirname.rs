// Directory Name Codec
// =======================================================
// Reversible obfuscation of a single path segment. This does not use the
// session key: it is URL-safe base64 behind a recognizable tag, so a
// structure-preserving decrypt can restore directory names without a key and
// plaintext segments pass through untouched.

use base64::{Engine as _, engine::general_purpose};

/// Tag marking an encoded segment.
pub const PREFIX: &str = "ENC_";

/// Encode a directory name. Names that already carry the tag are returned
/// unchanged.
pub fn encode(name: &str) -> String {
    if name.starts_with(PREFIX) {
        return name.to_string();
    }
    format!("{PREFIX}{}", general_purpose::URL_SAFE_NO_PAD.encode(name))
}

/// Decode a directory name.
///
/// Untagged names, and tagged names whose payload is not valid base64 of a
/// UTF-8 string, are returned unchanged.
pub fn decode(name: &str) -> String {
    let Some(payload) = name.strip_prefix(PREFIX) else {
        return name.to_string();
    };
    general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| name.to_string())
}
