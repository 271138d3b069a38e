//! Configuration for the signaling server and the client
//!
//! Values are layered: built-in defaults, then the TOML file named by
//! `PARLEY_CONFIG`, then `PARLEY_*` environment variables. Binaries apply
//! their command-line flags last and call `validate()`.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8025"
//!
//! [client]
//! server_url = "ws://rendezvous.example:8025"
//! user_id = "alice"
//! peer_listen_addr = "0.0.0.0:0"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Identity, PublicKey};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range or malformed
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Signaling server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,
    /// Where the server identity is kept; a fresh one is used if unset
    pub identity_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:8025".to_string(),
            identity_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `PARLEY_CONFIG` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = ConfigFile::load_from_env()?.server;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay `PARLEY_*` variables resolved through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("PARLEY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(path) = lookup("PARLEY_IDENTITY") {
            self.identity_path = Some(PathBuf::from(path));
        }
    }

    /// Check every value
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_socket_addr("listen_addr", &self.listen_addr)?;
        Ok(())
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling server
    pub server_url: String,
    /// The id this client registers under
    pub user_id: String,
    /// Address the peer listener binds to; port 0 picks a free port
    pub peer_listen_addr: String,
    /// Host put in connection details instead of the detected address
    pub advertised_host: Option<String>,
    /// Encoded server key; when set, unsigned server frames are dropped
    pub server_public_key: Option<String>,
    /// Where the client identity is kept
    pub identity_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_url: "ws://127.0.0.1:8025".to_string(),
            user_id: String::new(),
            peer_listen_addr: "0.0.0.0:0".to_string(),
            advertised_host: None,
            server_public_key: None,
            identity_path: None,
        }
    }
}

impl ClientConfig {
    /// Defaults, overlaid with `PARLEY_CONFIG` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = ConfigFile::load_from_env()?.client;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay `PARLEY_*` variables resolved through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PARLEY_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(user) = lookup("PARLEY_USER_ID") {
            self.user_id = user;
        }
        if let Some(addr) = lookup("PARLEY_PEER_LISTEN_ADDR") {
            self.peer_listen_addr = addr;
        }
        if let Some(host) = lookup("PARLEY_ADVERTISED_HOST") {
            self.advertised_host = Some(host);
        }
        if let Some(key) = lookup("PARLEY_SERVER_KEY") {
            self.server_public_key = Some(key);
        }
        if let Some(path) = lookup("PARLEY_IDENTITY") {
            self.identity_path = Some(PathBuf::from(path));
        }
    }

    /// Check every value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id must not be empty".to_string()));
        }
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "server_url must be a ws:// or wss:// URL, got '{}'",
                self.server_url
            )));
        }
        parse_socket_addr("peer_listen_addr", &self.peer_listen_addr)?;
        if let Some(host) = &self.advertised_host {
            if host.trim().is_empty() || host.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "advertised_host '{host}' is not a host name or address"
                )));
            }
        }
        self.server_key()?;
        Ok(())
    }

    /// The pinned server key, if one is configured
    pub fn server_key(&self) -> Result<Option<PublicKey>, ConfigError> {
        self.server_public_key
            .as_deref()
            .map(|encoded| {
                PublicKey::decode(encoded)
                    .map_err(|e| ConfigError::Invalid(format!("server_public_key: {e}")))
            })
            .transpose()
    }
}

/// On-disk layout: one optional table per binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// `[server]` table
    pub server: ServerConfig,
    /// `[client]` table
    pub client: ClientConfig,
}

impl ConfigFile {
    /// Parse a TOML document
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// The file named by `PARLEY_CONFIG`, or defaults when it is unset
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}

/// `~/.parley/<file_name>`, falling back to the working directory
pub fn default_identity_path(file_name: &str) -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"))
        .join(file_name)
}

/// Read the identity at `path`, creating and saving a new one if absent
///
/// Returns the identity and whether it was freshly generated.
pub fn load_or_create_identity(path: &Path) -> Result<(Identity, bool), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::read(path) {
        Ok(bytes) => {
            let identity = Identity::from_bytes(&bytes).map_err(|e| {
                ConfigError::Invalid(format!("identity file {}: {e}", path.display()))
            })?;
            Ok((identity, false))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            let identity = Identity::generate();
            std::fs::write(path, identity.to_bytes()).map_err(io_error)?;
            Ok((identity, true))
        }
        Err(e) => Err(io_error(e)),
    }
}

fn parse_socket_addr(name: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} '{value}' is not a socket address")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_client() -> ClientConfig {
        ClientConfig {
            user_id: "alice".to_string(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.listen_addr, "0.0.0.0:8025");
        assert!(server.validate().is_ok());

        let client = ClientConfig::default();
        assert_eq!(client.peer_listen_addr, "0.0.0.0:0");
        assert!(client.server_public_key.is_none());
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let config = ClientConfig {
            user_id: "   ".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_url_rejected() {
        let config = ClientConfig {
            server_url: "http://example.com".to_string(),
            ..valid_client()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_listen_addr_rejected() {
        let config = ClientConfig {
            peer_listen_addr: "nowhere".to_string(),
            ..valid_client()
        };
        assert!(config.validate().is_err());

        let server = ServerConfig {
            listen_addr: "8025".to_string(),
            ..ServerConfig::default()
        };
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_server_key_parsed() {
        let identity = Identity::generate();
        let config = ClientConfig {
            server_public_key: Some(identity.public_key().encode()),
            ..valid_client()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.server_key().unwrap(), Some(*identity.public_key()));

        let broken = ClientConfig {
            server_public_key: Some("not-a-key".to_string()),
            ..valid_client()
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten_addr = \"127.0.0.1:9000\"\n\n[client]\nuser_id = \"bob\"\nadvertised_host = \"10.0.0.5\""
        )
        .unwrap();

        let config = ConfigFile::load_from(file.path()).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.client.user_id, "bob");
        assert_eq!(config.client.advertised_host.as_deref(), Some("10.0.0.5"));
        // Untouched values keep their defaults
        assert_eq!(config.client.server_url, ClientConfig::default().server_url);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigFile::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            ConfigFile::parse("[client\nuser_id = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PARLEY_USER_ID", "carol"),
            ("PARLEY_SERVER_URL", "ws://10.1.1.1:8025"),
            ("PARLEY_LISTEN_ADDR", "127.0.0.1:7000"),
        ]
        .into_iter()
        .collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let mut client = ClientConfig::default();
        client.apply_env(lookup);
        assert_eq!(client.user_id, "carol");
        assert_eq!(client.server_url, "ws://10.1.1.1:8025");

        let mut server = ServerConfig::default();
        server.apply_env(lookup);
        assert_eq!(server.listen_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_identity_created_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.key");

        let (created, fresh) = load_or_create_identity(&path).unwrap();
        assert!(fresh);
        assert!(path.exists());

        let (loaded, fresh) = load_or_create_identity(&path).unwrap();
        assert!(!fresh);
        assert_eq!(loaded.public_key(), created.public_key());
    }

    #[test]
    fn test_corrupt_identity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        std::fs::write(&path, b"short").unwrap();

        assert!(matches!(
            load_or_create_identity(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
