//! Node configuration
//!
//! The node is configured with a JSON document (the FFI surface hands it
//! over as a string). Decoding is lenient: unknown fields are ignored, so
//! configs written for newer nodes still load. Every field has a default.

use nebula_core::error::{NebulaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory holding the block repository, metadata and keys.
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level: TRACE, DEBUG, INFO, NOTICE, WARN, ERROR or FATAL.
    #[serde(rename = "log-level", default = "default_log_level")]
    pub log_level: String,

    /// REST API port (served by an external collaborator).
    #[serde(rename = "api-port", default = "default_api_port")]
    pub api_port: u16,

    /// Discovery (DHT) port.
    #[serde(rename = "disc-port", default = "default_disc_port")]
    pub disc_port: u16,

    /// Multiaddresses to listen on.
    #[serde(rename = "listen-addrs", default = "default_listen_addrs")]
    pub listen_addrs: Vec<String>,

    /// Bootstrap node SPRs for discovery.
    #[serde(rename = "bootstrap-node", default)]
    pub bootstrap_nodes: Vec<String>,

    /// NAT strategy ("any", "none", or an explicit public IP).
    #[serde(default = "default_nat")]
    pub nat: String,

    /// Storage quota in bytes (0 = unlimited).
    #[serde(rename = "storage-quota", default)]
    pub storage_quota: u64,

    /// Default block TTL in seconds (0 = no expiry tracking).
    #[serde(rename = "block-ttl", default = "default_block_ttl")]
    pub block_ttl: u64,

    /// Worker threads for the async runtime (0 = number of cores).
    #[serde(rename = "num-threads", default)]
    pub num_threads: usize,

    /// Retries per block inside the exchange layer.
    #[serde(rename = "block-retries", default = "default_block_retries")]
    pub block_retries: u32,

    /// Allowed CORS origin for the REST collaborator.
    #[serde(rename = "api-cors-allowed-origin", default)]
    pub api_cors_allowed_origin: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            api_port: default_api_port(),
            disc_port: default_disc_port(),
            listen_addrs: default_listen_addrs(),
            bootstrap_nodes: Vec::new(),
            nat: default_nat(),
            storage_quota: 0,
            block_ttl: default_block_ttl(),
            num_threads: 0,
            block_retries: default_block_retries(),
            api_cors_allowed_origin: None,
        }
    }
}

impl NodeConfig {
    /// Parse a JSON configuration string. Missing fields take defaults;
    /// unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|e| NebulaError::InvalidArgument(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Validate field values. Directory bootstrap happens separately in
    /// [`crate::node::NebulaNode::new`].
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" | "INFO" | "NOTICE" | "WARN" | "ERROR" | "FATAL" => {}
            other => {
                return Err(NebulaError::InvalidArgument(format!(
                    "unknown log level '{}'",
                    other
                )))
            }
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(NebulaError::InvalidArgument(
                "data-dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The block repository directory.
    pub fn repo_dir(&self) -> PathBuf {
        self.data_dir.join("repo")
    }

    /// The private key file.
    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("private.key")
    }

    /// Map the configured level onto a tracing level. NOTICE and FATAL
    /// have no direct equivalent and collapse onto INFO and ERROR.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_ascii_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" | "NOTICE" => tracing::Level::INFO,
            "WARN" => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./nebula")
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_api_port() -> u16 {
    8070
}

fn default_disc_port() -> u16 {
    8090
}

fn default_listen_addrs() -> Vec<String> {
    vec!["/ip4/0.0.0.0/tcp/0".to_string()]
}

fn default_nat() -> String {
    "any".to_string()
}

fn default_block_ttl() -> u64 {
    60 * 60 * 24
}

fn default_block_retries() -> u32 {
    3
}

/// Create `dir` with owner-only permissions, or verify an existing
/// directory is not group/world accessible. Insecure permissions abort
/// node creation.
pub fn bootstrap_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(|e| {
                    NebulaError::IoFailure(format!("cannot create data directory: {}", e))
                })?;
        }
        #[cfg(not(unix))]
        {
            std::fs::create_dir_all(dir).map_err(|e| {
                NebulaError::IoFailure(format!("cannot create data directory: {}", e))
            })?;
        }
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dir)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(NebulaError::InvalidArgument(format!(
                "data directory {:?} has insecure permissions {:o}, expected owner-only",
                dir,
                mode & 0o777
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.api_port, 8070);
        assert_eq!(config.storage_quota, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "data-dir": "/tmp/nebula-test",
            "log-level": "DEBUG",
            "storage-quota": 1048576,
            "listen-addrs": ["/ip4/127.0.0.1/tcp/8071"],
            "bootstrap-node": ["spr:abc"]
        }"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/nebula-test"));
        assert_eq!(config.log_level, "DEBUG");
        assert_eq!(config.storage_quota, 1_048_576);
        assert_eq!(config.listen_addrs.len(), 1);
        assert_eq!(config.bootstrap_nodes, vec!["spr:abc".to_string()]);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"log-level": "WARN", "future-field": {"nested": true}}"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert_eq!(config.log_level, "WARN");
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let json = r#"{"log-level": "LOUD"}"#;
        assert!(NodeConfig::from_json(json).is_err());
    }

    #[test]
    fn test_notice_and_fatal_map_onto_tracing() {
        let mut config = NodeConfig {
            log_level: "NOTICE".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.log_level = "FATAL".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_bootstrap_creates_owner_only_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");
        bootstrap_data_dir(&dir).unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_bootstrap_rejects_insecure_dir() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(bootstrap_data_dir(&dir).is_err());
    }
}
