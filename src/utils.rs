use sha2::{Digest, Sha256};

/// 32-bit id derived from a name (camera name, session tag). Stable across
/// runs and platforms.
pub fn stable_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
