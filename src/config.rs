//! Configuration loading for both endpoints
//!
//! Each binary reads a small JSON file at startup. A missing or malformed
//! file is fatal; defaults only fill in fields the file omits.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ChatError, Result};

/// Server configuration, loaded from `server-config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The host port to accept incoming connections on.
    pub host_port: u16,
    /// The maximum log level ("off", "info", "warn", or "err").
    pub log_level: String,
    /// If specified, a writable path where logging is written to file.
    pub log_file: Option<String>,
    /// Path to the server's TLS certificate (PEM).
    pub host_certificate_path: String,
    /// Path to the server's TLS private key (PEM).
    pub host_private_key_path: String,
    /// Max number of simultaneous client connections to support.
    pub max_clients: usize,
    /// Chat rooms to create at startup.
    pub initial_rooms: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_port: 8080,
            log_level: "warn".to_string(),
            log_file: None,
            host_certificate_path: "server-cert.pem".to_string(),
            host_private_key_path: "server-key.pem".to_string(),
            max_clients: 10,
            initial_rooms: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load the server configuration from the JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// Client configuration, loaded from `client-config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name of the server to connect to. Also the name the server
    /// certificate is verified against.
    pub host_name: String,
    /// Host port of the server to connect to.
    pub host_port: u16,
    /// The maximum log level ("off", "info", "warn", or "err").
    pub log_level: String,
    /// If specified, a writable path where logging is written to file.
    pub log_file: Option<String>,
    /// User name to claim; a throwaway name is generated when absent.
    pub user_name: Option<String>,
    /// Zero or more extra trust anchors (PEM) to recognize when connecting,
    /// e.g. a self-signed server certificate.
    pub custom_certificates: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            host_port: 8080,
            log_level: "warn".to_string(),
            log_file: None,
            user_name: None,
            custom_certificates: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load the client configuration from the JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        ChatError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| ChatError::config(format!("invalid config {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.host_port, 8080);
        assert_eq!(config.max_clients, 10);
        assert_eq!(config.log_level, "warn");
        assert!(config.initial_rooms.is_empty());
    }

    #[test]
    fn test_server_config_overrides() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "host_port": 9443,
                "max_clients": 2,
                "log_level": "info",
                "initial_rooms": ["lobby", "dev"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.host_port, 9443);
        assert_eq!(config.max_clients, 2);
        assert_eq!(config.initial_rooms, vec!["lobby", "dev"]);
    }

    #[test]
    fn test_client_config_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.host_name, "localhost");
        assert_eq!(config.host_port, 8080);
        assert!(config.user_name.is_none());
        assert!(config.custom_certificates.is_empty());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ServerConfig::load(Path::new("/does/not/exist.json")).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
