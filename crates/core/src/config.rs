//! Configuration management for s3gate

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable selecting the configuration profile
pub const ENVIRONMENT_VAR: &str = "SERVER_ENVIRONMENT";

/// Bucket listed by `GET /files` when none is configured
pub const DEFAULT_BUCKET: &str = "testbucket";

/// Smallest part the S3 protocol accepts in a multipart upload (5 MiB)
pub const MIN_PART_SIZE_MIB: u64 = 5;

/// Deployment profile, one configuration file each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Stage,
    Prod,
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Profile::Dev => "dev",
            Profile::Stage => "stage",
            Profile::Prod => "prod",
        }
    }

    /// Read the profile from `SERVER_ENVIRONMENT`.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(ENVIRONMENT_VAR).map_err(|_| {
            Error::Config(format!(
                "{} is not set (expected one of: dev, stage, prod)",
                ENVIRONMENT_VAR
            ))
        })?;
        value.parse()
    }

    /// Configuration file name for this profile, e.g. `dev-config.toml`
    pub fn file_name(&self) -> String {
        format!("{}-config.toml", self.as_str())
    }

    fn requires_tls(&self) -> bool {
        matches!(self, Profile::Stage | Profile::Prod)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(Profile::Dev),
            "stage" => Ok(Profile::Stage),
            "prod" => Ok(Profile::Prod),
            other => Err(Error::Config(format!(
                "Incorrect environment '{}' (expected one of: dev, stage, prod)",
                other
            ))),
        }
    }
}

/// How uploads pick their server-side encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionMode {
    /// KMS when a key ID is known, otherwise decided by the multipart setting
    #[default]
    Auto,
    Kms,
    ServerManaged,
    Password,
    None,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
    pub logging: Option<LoggingConfig>,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `host:port` or a full URL
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<String>,

    #[serde(default)]
    pub encryption_mode: EncryptionMode,

    /// Password for SSE-C key derivation (only honoured over TLS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_password: Option<String>,

    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub use_ssl: bool,

    #[serde(default)]
    pub enable_multipart_upload: bool,
    /// Multipart chunk size in MiB (default: 16)
    #[serde(default = "default_file_chunk_size")]
    pub file_chunk_size: u64,
}

impl StorageConfig {
    /// Endpoint as a URL, adding the scheme implied by `use_ssl` when missing.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }

    /// Whether traffic to the object store is encrypted.
    pub fn is_secure(&self) -> bool {
        self.endpoint_url().starts_with("https://")
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub api_path: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub cors_allowed_clients: Vec<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
    /// Scheme the gateway listens with; only `http` is served, TLS is
    /// terminated in front of it
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl ServerConfig {
    /// Route prefix built from `api_path` and `api_version` (empty when unset)
    pub fn base_path(&self) -> String {
        let mut base = String::new();
        for segment in [&self.api_path, &self.api_version] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                base.push('/');
                base.push_str(segment);
            }
        }
        base
    }

    /// Socket address to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Advanced configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Connect timeout towards the object store, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// How long an upload waits for a multipart completion notification
    #[serde(default = "default_completion_wait")]
    pub completion_wait_ms: u64,
    #[serde(default)]
    pub object_locking: bool,
    #[serde(default)]
    pub default_bucket_encryption: bool,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            completion_wait_ms: default_completion_wait(),
            object_locking: false,
            default_bucket_encryption: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default values
fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_file_chunk_size() -> u64 {
    16 // 16MiB
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> String {
    "8080".to_string()
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_completion_wait() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Path of the configuration file for `profile` inside `config_dir`
pub fn get_config_path(config_dir: &Path, profile: Profile) -> PathBuf {
    config_dir.join(profile.file_name())
}

/// Load the configuration of `profile` from `config_dir`
pub fn load_config(config_dir: &Path, profile: Profile) -> Result<ConfigFile> {
    let config_path = get_config_path(config_dir, profile);

    if !config_path.exists() {
        return Err(Error::ConfigNotFound(config_path));
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file: {}", e))
    })?;

    parse_config(&content)
}

/// Parse a configuration document
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content)
        .map_err(|e| Error::InvalidConfig(format!("Failed to parse config file: {}", e)))
}

/// Validate configuration for `profile`
pub fn validate_config(config: &ConfigFile, profile: Profile) -> Result<()> {
    let storage = &config.storage;

    if storage.endpoint.trim().is_empty() {
        return Err(Error::Config("storage.endpoint cannot be empty".to_string()));
    }

    storage
        .endpoint_url()
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_string))
        .ok_or_else(|| {
            Error::Config(format!("storage.endpoint '{}' is not a valid URL", storage.endpoint))
        })?;

    if storage.access_key_id.is_empty() || storage.secret_access_key.is_empty() {
        return Err(Error::Config(
            "storage.access_key_id and storage.secret_access_key must be set".to_string(),
        ));
    }

    if storage.bucket.is_empty() {
        return Err(Error::Config("storage.bucket cannot be empty".to_string()));
    }

    if storage.enable_multipart_upload && storage.file_chunk_size < MIN_PART_SIZE_MIB {
        return Err(Error::Config(format!(
            "storage.file_chunk_size must be at least {} MiB when multipart upload is enabled (got {})",
            MIN_PART_SIZE_MIB, storage.file_chunk_size
        )));
    }

    let has_key = storage
        .encryption_key_id
        .as_deref()
        .is_some_and(|k| !k.trim().is_empty());

    match storage.encryption_mode {
        EncryptionMode::Kms if !has_key => {
            return Err(Error::Config(
                "encryption_mode 'kms' requires storage.encryption_key_id".to_string(),
            ));
        }
        EncryptionMode::Password => {
            if storage.sse_password.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config(
                    "encryption_mode 'password' requires storage.sse_password".to_string(),
                ));
            }
            if !storage.is_secure() {
                return Err(Error::Config(
                    "encryption_mode 'password' sends key material to the store and requires use_ssl = true"
                        .to_string(),
                ));
            }
        }
        // A configured key ID always wins, so the password is only used without one
        EncryptionMode::Auto
            if !has_key
                && storage.sse_password.as_deref().is_some_and(|p| !p.is_empty())
                && !storage.is_secure() =>
        {
            return Err(Error::Config(
                "storage.sse_password sends key material to the store and requires use_ssl = true"
                    .to_string(),
            ));
        }
        _ => {}
    }

    if profile.requires_tls() && !storage.is_secure() {
        return Err(Error::Config(format!(
            "profile '{}' requires a TLS endpoint (set storage.use_ssl = true)",
            profile
        )));
    }

    if config.server.port.trim().is_empty() {
        return Err(Error::Config("server.port cannot be empty".to_string()));
    }

    match config.server.protocol.trim().to_ascii_lowercase().as_str() {
        "http" => {}
        "https" => {
            return Err(Error::Config(
                "server.protocol 'https' is not served directly; terminate TLS in front of the gateway and set protocol = \"http\""
                    .to_string(),
            ));
        }
        other => {
            return Err(Error::Config(format!(
                "server.protocol '{}' is not supported (expected http)",
                other
            )));
        }
    }

    Ok(())
}

/// Public alias for ConfigFile (used by lib.rs)
pub use ConfigFile as Config;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_config() -> ConfigFile {
        ConfigFile {
            storage: StorageConfig {
                endpoint: "localhost:9000".to_string(),
                access_key_id: "minioadmin".to_string(),
                secret_access_key: "minioadmin".to_string(),
                encryption_key_id: Some("dev-key".to_string()),
                encryption_mode: EncryptionMode::Auto,
                sse_password: None,
                bucket: "testbucket".to_string(),
                region: "us-east-1".to_string(),
                use_ssl: false,
                enable_multipart_upload: true,
                file_chunk_size: 16,
            },
            server: ServerConfig {
                api_path: String::new(),
                api_version: String::new(),
                cors_allowed_clients: vec!["*".to_string()],
                host: "127.0.0.1".to_string(),
                port: "8080".to_string(),
                protocol: "http".to_string(),
            },
            advanced: AdvancedConfig::default(),
            logging: None,
        }
    }

    #[test]
    fn test_validate_config_valid() {
        let config = make_valid_config();
        assert!(validate_config(&config, Profile::Dev).is_ok());
    }

    #[test]
    fn test_auto_mode_password_requires_tls() {
        let mut config = make_valid_config();
        config.storage.encryption_key_id = None;
        config.storage.sse_password = Some("secret".to_string());
        let err = validate_config(&config, Profile::Dev).unwrap_err();
        assert!(err.to_string().contains("sse_password"));

        config.storage.use_ssl = true;
        assert!(validate_config(&config, Profile::Dev).is_ok());

        // With a key ID the password is never used for uploads
        config.storage.use_ssl = false;
        config.storage.encryption_key_id = Some("dev-key".to_string());
        assert!(validate_config(&config, Profile::Dev).is_ok());
    }

    #[test]
    fn test_server_protocol_is_checked() {
        let mut config = make_valid_config();
        config.server.protocol = "HTTP".to_string();
        assert!(validate_config(&config, Profile::Dev).is_ok());

        config.server.protocol = "https".to_string();
        let err = validate_config(&config, Profile::Dev).unwrap_err();
        assert!(err.to_string().contains("terminate TLS"));

        config.server.protocol = "gopher".to_string();
        assert!(validate_config(&config, Profile::Dev).is_err());
    }

    #[test]
    fn test_validate_config_empty_endpoint() {
        let mut config = make_valid_config();
        config.storage.endpoint = "".to_string();
        assert!(validate_config(&config, Profile::Dev).is_err());
    }

    #[test]
    fn test_validate_config_no_credentials() {
        let mut config = make_valid_config();
        config.storage.secret_access_key = "".to_string();
        assert!(validate_config(&config, Profile::Dev).is_err());
    }

    #[test]
    fn test_validate_config_chunk_below_floor() {
        let mut config = make_valid_config();
        config.storage.file_chunk_size = 4;
        assert!(validate_config(&config, Profile::Dev).is_err());

        // Irrelevant while multipart is off
        config.storage.enable_multipart_upload = false;
        assert!(validate_config(&config, Profile::Dev).is_ok());
    }

    #[test]
    fn test_validate_config_chunk_boundary() {
        let mut config = make_valid_config();
        config.storage.file_chunk_size = 5;
        assert!(validate_config(&config, Profile::Dev).is_ok());
    }

    #[test]
    fn test_validate_config_kms_mode_without_key() {
        let mut config = make_valid_config();
        config.storage.encryption_mode = EncryptionMode::Kms;
        config.storage.encryption_key_id = Some("  ".to_string());
        assert!(validate_config(&config, Profile::Dev).is_err());
    }

    #[test]
    fn test_validate_config_password_mode_requires_tls() {
        let mut config = make_valid_config();
        config.storage.encryption_mode = EncryptionMode::Password;
        config.storage.sse_password = Some("correct horse battery staple".to_string());
        assert!(validate_config(&config, Profile::Dev).is_err());

        config.storage.use_ssl = true;
        assert!(validate_config(&config, Profile::Dev).is_ok());
    }

    #[test]
    fn test_validate_config_prod_requires_tls() {
        let mut config = make_valid_config();
        assert!(validate_config(&config, Profile::Prod).is_err());
        assert!(validate_config(&config, Profile::Stage).is_err());

        config.storage.endpoint = "https://s3.example.com".to_string();
        assert!(validate_config(&config, Profile::Prod).is_ok());
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("dev".parse::<Profile>().unwrap(), Profile::Dev);
        assert_eq!("PROD".parse::<Profile>().unwrap(), Profile::Prod);
        assert!("qa".parse::<Profile>().is_err());
        assert!("".parse::<Profile>().is_err());
        assert_eq!(Profile::Stage.file_name(), "stage-config.toml");
    }

    #[test]
    fn test_endpoint_url_scheme() {
        let mut config = make_valid_config();
        assert_eq!(config.storage.endpoint_url(), "http://localhost:9000");
        assert!(!config.storage.is_secure());

        config.storage.use_ssl = true;
        assert_eq!(config.storage.endpoint_url(), "https://localhost:9000");
        assert!(config.storage.is_secure());
    }

    #[test]
    fn test_base_path() {
        let mut config = make_valid_config();
        assert_eq!(config.server.base_path(), "");

        config.server.api_path = "/api/".to_string();
        config.server.api_version = "v1".to_string();
        assert_eq!(config.server.base_path(), "/api/v1");
    }

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
            [storage]
            endpoint = "localhost:9000"
            access_key_id = "minioadmin"
            secret_access_key = "minioadmin"

            [server]
            port = "8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.bucket, DEFAULT_BUCKET);
        assert_eq!(config.storage.file_chunk_size, 16);
        assert_eq!(config.storage.encryption_mode, EncryptionMode::Auto);
        assert!(!config.storage.enable_multipart_upload);
        assert_eq!(config.advanced.completion_wait_ms, 100);
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_parse_encryption_mode_kebab_case() {
        let config = parse_config(
            r#"
            [storage]
            endpoint = "localhost:9000"
            access_key_id = "a"
            secret_access_key = "b"
            encryption_mode = "server-managed"

            [server]
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.encryption_mode, EncryptionMode::ServerManaged);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path(), Profile::Dev).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_config_from_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dev-config.toml"),
            "[storage]\nendpoint = \"localhost:9000\"\naccess_key_id = \"a\"\nsecret_access_key = \"b\"\n[server]\n",
        )
        .unwrap();

        let config = load_config(dir.path(), Profile::Dev).unwrap();
        assert_eq!(config.storage.endpoint, "localhost:9000");
    }

    #[test]
    fn test_shipped_dev_config_is_valid() {
        let config = parse_config(include_str!("../../../config/dev-config.toml")).unwrap();
        assert!(validate_config(&config, Profile::Dev).is_ok());
        assert!(validate_config(&config, Profile::Prod).is_err());
        assert_eq!(config.logging.unwrap().format, "pretty");
    }
}
