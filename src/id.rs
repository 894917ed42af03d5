//! ID generation and clock utilities for Repowatch

use chrono::{DateTime, Utc};
use rand::Rng;

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a unique batch ID
///
/// Format: `batch-{timestamp_ms}-{random_hex}`
/// Example: `batch-1738300800123-a1b2c3`
pub fn generate_batch_id() -> String {
    let bytes: [u8; 3] = rand::rng().random();
    format!("batch-{}-{}", now_ms(), hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_batch_id_format() {
        let id = generate_batch_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "batch");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_batch_id_unique() {
        let a = generate_batch_id();
        let b = generate_batch_id();
        assert_ne!(a, b);
    }
}
