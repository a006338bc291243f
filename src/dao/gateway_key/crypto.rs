use sha2::{Digest, Sha256};
use rand::Rng;

/// 从原始密钥生成 SHA-256 哈希
///
/// # Arguments
/// * `key` - 原始密钥字符串
///
/// # Returns
/// * SHA-256 哈希的十六进制字符串
pub fn generate_key_hash(key: &str) -> String {
    let mut hasher = Sha256::default();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// 生成新的网关密钥明文，格式 sk-hermes-<32位十六进制>
pub fn generate_gateway_key() -> String {
    let mut rng = rand::thread_rng();
    let raw: [u8; 16] = rng.gen();
    let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sk-hermes-{}", hex)
}

/// 常数时间比较两个哈希字符串
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_generation() {
        let key = "sk-hermes-1234567890abcdef";
        let hash1 = generate_key_hash(key);
        let hash2 = generate_key_hash(key);

        // 相同输入应该产生相同哈希
        assert_eq!(hash1, hash2);

        // 哈希应该是64个字符(SHA-256的十六进制表示)
        assert_eq!(hash1.len(), 64);

        // 不同输入应该产生不同哈希
        let different_hash = generate_key_hash("different-key");
        assert_ne!(hash1, different_hash);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let key1 = generate_gateway_key();
        let key2 = generate_gateway_key();
        assert!(key1.starts_with("sk-hermes-"));
        assert_eq!(key1.len(), "sk-hermes-".len() + 32);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_constant_time_eq() {
        let hash = generate_key_hash("a-key");
        assert!(constant_time_eq(&hash, &hash));
        assert!(!constant_time_eq(&hash, &generate_key_hash("b-key")));
        assert!(!constant_time_eq(&hash, "short"));
    }
}
