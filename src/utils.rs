use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of a recipient identifier for safe
/// logging. Recipient ids never appear in logs in the clear.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}
