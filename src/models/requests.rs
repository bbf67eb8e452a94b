//! Request DTOs for the cache server API

use serde::Deserialize;

/// Longest accepted key, in bytes.
pub const MAX_KEY_LENGTH: usize = 256;

/// Largest accepted value, in bytes.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Request body for `PUT /set`
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    /// TTL in seconds; falls back to the cache default, 0 never expires
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Returns an error message if the request is unacceptable.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            ));
        }
        if self.value.len() > MAX_VALUE_SIZE {
            return Some(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, value: &str) -> SetRequest {
        SetRequest {
            key: key.to_string(),
            value: value.to_string(),
            ttl: None,
        }
    }

    #[test]
    fn test_set_request_deserialize() {
        let req: SetRequest = serde_json::from_str(r#"{"key": "user:1", "value": "alice"}"#).unwrap();
        assert_eq!(req.key, "user:1");
        assert_eq!(req.value, "alice");
        assert!(req.ttl.is_none());

        let req: SetRequest =
            serde_json::from_str(r#"{"key": "k", "value": "v", "ttl": 0}"#).unwrap();
        assert_eq!(req.ttl, Some(0));
    }

    #[test]
    fn test_validate_key_bounds() {
        assert!(request("", "v").validate().is_some());
        assert!(request(&"k".repeat(MAX_KEY_LENGTH), "v").validate().is_none());
        assert!(request(&"k".repeat(MAX_KEY_LENGTH + 1), "v").validate().is_some());
    }

    #[test]
    fn test_validate_value_size() {
        let big = "x".repeat(MAX_VALUE_SIZE + 1);
        let msg = request("k", &big).validate().unwrap();
        assert!(msg.contains("Value exceeds"));
    }
}
