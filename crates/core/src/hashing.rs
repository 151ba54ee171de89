//! SHA-256 digests for cache keys.

use sha2::{Digest, Sha256};

/// Hex SHA-256 over `fields`, each length-prefixed so that field
/// boundaries cannot collide (`["ab", "c"]` differs from `["a", "bc"]`).
pub fn digest_fields<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for field in fields {
        let field = field.as_ref();
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    format!("{:x}", hasher.finalize())
}
