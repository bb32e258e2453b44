use crate::error::{Error, Result};

/// Default key expression prefix for the bridge.
pub const DEFAULT_KEY_PREFIX: &str = "powerbox";

/// Build the key expression for a named topic under a prefix.
///
/// # Example
/// ```
/// use powerbox_common::keyexpr::topic;
///
/// assert_eq!(topic("powerbox", "ventilation_level"), "powerbox/ventilation_level");
/// ```
pub fn topic(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix, name)
}

/// Build the key expression for bridge status.
///
/// # Example
/// ```
/// use powerbox_common::keyexpr::status_key;
///
/// assert_eq!(status_key("powerbox"), "powerbox/@/status");
/// ```
pub fn status_key(prefix: &str) -> String {
    format!("{}/@/status", prefix)
}

/// Check that a prefix is a concrete key expression usable for publishing.
///
/// Wildcards and empty chunks are rejected since every topic is derived by
/// appending a point name to the prefix.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::KeyExpr("prefix cannot be empty".to_string()));
    }

    if prefix.contains(['*', '$', '?', '#']) {
        return Err(Error::KeyExpr(format!(
            "prefix '{}' must not contain wildcards or reserved characters",
            prefix
        )));
    }

    if prefix.split('/').any(str::is_empty) {
        return Err(Error::KeyExpr(format!(
            "prefix '{}' contains an empty chunk",
            prefix
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("powerbox").is_ok());
        assert!(validate_prefix("home/ventilation").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("home/**").is_err());
        assert!(validate_prefix("home//ventilation").is_err());
        assert!(validate_prefix("/powerbox").is_err());
        assert!(validate_prefix("powerbox/").is_err());
    }
}
