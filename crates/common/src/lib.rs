//! LaunchGate Common Library
//!
//! Shared data model, error types, and sandboxed storage for the LaunchGate
//! reality testing engine.

pub mod cas;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cas::ArtifactStore;
pub use error::{Error, Result};
pub use schedule::{Schedule, ScheduleFile, ScheduleStatus};
pub use storage::{BlobStore, FsBlobStore};
pub use store::RunStore;
pub use types::*;

/// LaunchGate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".launchgate")
}

/// Default schedule state file
pub fn default_schedule_path() -> std::path::PathBuf {
    default_store_path().join("schedules.json")
}

/// Derive the per-site storage key from a target URL.
///
/// `https://Shop.Example.com:8443/cart` becomes `shop-example-com-8443`.
pub fn site_key(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("unknown").to_ascii_lowercase();
    let raw = match url.port() {
        Some(port) => format!("{}-{}", host, port),
        None => host,
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Parse and check a target URL; only http(s) targets can be driven.
pub fn parse_target_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(Error::InvalidUrl(format!(
            "{}: expected an http(s) URL with a host",
            raw
        ))),
    }
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_normalizes_host_and_port() {
        let url = url::Url::parse("https://Shop.Example.com:8443/cart").unwrap();
        assert_eq!(site_key(&url), "shop-example-com-8443");
    }

    #[test]
    fn test_parse_target_url_rejects_non_http() {
        assert!(parse_target_url("https://example.com").is_ok());
        assert!(parse_target_url("ftp://example.com").is_err());
        assert!(parse_target_url("not a url").is_err());
        assert!(parse_target_url("file:///etc/passwd").is_err());
    }
}
