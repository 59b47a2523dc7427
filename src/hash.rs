use serde::Serialize;
use sha2::{Digest, Sha256};

/// Annotation carrying the content hash of a generated child object.
pub const ANNOTATION_HASH: &str = "imageversion.dev/template-hash";

/// Hex encoded SHA-256 over the JSON form of `value`.
pub fn generate_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

pub fn is_different<T: Serialize>(a: &T, b: &T) -> Result<bool, serde_json::Error> {
    Ok(generate_hash(a)? != generate_hash(b)?)
}
