//! CLI argument validation functions
//!
//! Custom value parsers for arguments clap cannot check on its own.

use std::fs;
use std::path::PathBuf;

/// Longest TTL accepted on the command line: one year.
const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Validate a TTL in whole seconds (1 to one year)
pub fn validate_ttl(ttl_str: &str) -> Result<u64, String> {
    let ttl: u64 = ttl_str
        .parse()
        .map_err(|_| format!("TTL must be a whole number of seconds, got: '{}'", ttl_str))?;

    if ttl == 0 {
        return Err("TTL must be greater than 0 seconds".to_string());
    }

    if ttl > MAX_TTL_SECONDS {
        return Err(format!("TTL cannot exceed {} seconds", MAX_TTL_SECONDS));
    }

    Ok(ttl)
}

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate a cache alias name
pub fn validate_alias(alias_str: &str) -> Result<String, String> {
    let alias = alias_str.trim();

    if alias.is_empty() {
        return Err("Alias cannot be empty".to_string());
    }

    if alias.chars().any(char::is_whitespace) {
        return Err(format!("Alias cannot contain whitespace: '{}'", alias_str));
    }

    Ok(alias.to_string())
}

/// Validate a cache key with the same rules the key codec applies
pub fn validate_key(key_str: &str) -> Result<String, String> {
    crate::codec::key::validate(key_str).map_err(|e| e.to_string())?;
    Ok(key_str.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_validation_valid() {
        for ttl_str in ["1", "60", "86400", "31536000"] {
            assert!(validate_ttl(ttl_str).is_ok(), "TTL {} should be valid", ttl_str);
        }
    }

    #[test]
    fn test_ttl_validation_invalid() {
        for ttl_str in ["0", "-5", "abc", "", "1.5", "31536001"] {
            assert!(validate_ttl(ttl_str).is_err(), "TTL '{}' should be invalid", ttl_str);
        }
    }

    #[test]
    fn test_config_file_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("kvcache.toml");
        fs::write(&file, "[caches.default]\nbackend = \"memory\"\n").unwrap();

        assert!(validate_config_file_path(file.to_str().unwrap()).is_ok());
        assert!(validate_config_file_path(dir.path().to_str().unwrap()).is_err());
        assert!(validate_config_file_path("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_alias_validation() {
        assert_eq!(validate_alias(" default ").unwrap(), "default");
        assert!(validate_alias("").is_err());
        assert!(validate_alias("two words").is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("user:42").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("tab\there").is_err());
        assert!(validate_key(&"k".repeat(2000)).is_err());
    }
}
