//! Server-side encryption selection and resolution

use crate::config::{EncryptionMode, StorageConfig};
use crate::error::{Error, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use std::fmt;

/// Domain prefix mixed into every SSE-C salt
const SALT_DOMAIN: &str = "s3gate/sse-c:";

/// Length of an SSE-C key (AES-256)
const CUSTOMER_KEY_LEN: usize = 32;

/// The encryption a transfer asks for. Exactly one variant is active.
#[derive(Clone, PartialEq, Eq)]
pub enum EncryptionSpec {
    /// Leave it to the bucket's default configuration
    None,
    /// SSE-S3: the store manages the key
    ServerManaged,
    /// SSE-KMS with a key held by the key-management service
    Kms { key_id: String },
    /// SSE-C with a key derived from a password
    PasswordDerived { password: String, salt: Vec<u8> },
}

impl EncryptionSpec {
    pub fn label(&self) -> &str {
        match self {
            EncryptionSpec::None => "none",
            EncryptionSpec::ServerManaged => "sse-s3",
            EncryptionSpec::Kms { .. } => "sse-kms",
            EncryptionSpec::PasswordDerived { .. } => "sse-c",
        }
    }
}

impl fmt::Debug for EncryptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionSpec::None => write!(f, "None"),
            EncryptionSpec::ServerManaged => write!(f, "ServerManaged"),
            EncryptionSpec::Kms { key_id } => f.debug_struct("Kms").field("key_id", key_id).finish(),
            EncryptionSpec::PasswordDerived { .. } => write!(f, "PasswordDerived(<redacted>)"),
        }
    }
}

/// Concrete encryption parameters sent with requests
#[derive(Clone, PartialEq, Eq)]
pub enum EncryptionHandle {
    None,
    ServerManaged,
    Kms { key_id: String },
    /// Base64 key and base64 MD5 of the key, as SSE-C headers expect
    CustomerKey { key: String, key_md5: String },
}

impl EncryptionHandle {
    /// SSE-C parameters must accompany every part and every read
    pub fn is_customer_key(&self) -> bool {
        matches!(self, EncryptionHandle::CustomerKey { .. })
    }
}

impl fmt::Debug for EncryptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionHandle::None => write!(f, "None"),
            EncryptionHandle::ServerManaged => write!(f, "ServerManaged"),
            EncryptionHandle::Kms { key_id } => {
                f.debug_struct("Kms").field("key_id", key_id).finish()
            }
            EncryptionHandle::CustomerKey { .. } => write!(f, "CustomerKey(<redacted>)"),
        }
    }
}

/// Settings the selector works from
#[derive(Debug, Clone, Default)]
pub struct EncryptionPolicy {
    pub mode: EncryptionMode,
    pub key_id: Option<String>,
    pub password: Option<String>,
    pub multipart_enabled: bool,
    pub secure_transport: bool,
}

impl EncryptionPolicy {
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self {
            mode: storage.encryption_mode,
            key_id: non_empty(storage.encryption_key_id.as_deref()),
            password: non_empty(storage.sse_password.as_deref()),
            multipart_enabled: storage.enable_multipart_upload,
            secure_transport: storage.is_secure(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct EncryptionSelector {
    policy: EncryptionPolicy,
}

impl EncryptionSelector {
    pub fn new(policy: EncryptionPolicy) -> Self {
        Self { policy }
    }

    /// Pick the encryption for an upload of `bucket`/`object`.
    ///
    /// A key ID, from the request or else from configuration, always takes
    /// precedence over password-derived encryption.
    pub fn select(
        &self,
        request_key_id: Option<&str>,
        bucket: &str,
        object: &str,
    ) -> Result<EncryptionSpec> {
        let key_id = non_empty(request_key_id).or_else(|| self.policy.key_id.clone());

        match (self.policy.mode, key_id) {
            (EncryptionMode::None, _) => Ok(EncryptionSpec::None),
            (_, Some(key_id)) => Ok(EncryptionSpec::Kms { key_id }),
            (EncryptionMode::Kms, None) => Err(Error::EncryptionConfig(
                "a key-management key ID is required but none was supplied".to_string(),
            )),
            (EncryptionMode::ServerManaged, None) => Ok(EncryptionSpec::ServerManaged),
            (EncryptionMode::Password, None) => self.password_spec(bucket, object).ok_or_else(|| {
                Error::EncryptionConfig("password encryption selected but no password configured".to_string())
            }),
            (EncryptionMode::Auto, None) => {
                if let Some(spec) = self.password_spec(bucket, object) {
                    Ok(spec)
                } else if self.policy.multipart_enabled {
                    Ok(EncryptionSpec::ServerManaged)
                } else {
                    Ok(EncryptionSpec::None)
                }
            }
        }
    }

    /// The customer key this gateway derives for `bucket`/`object`, if any.
    ///
    /// Only SSE-C needs client-side parameters on reads; the store decrypts
    /// SSE-S3 and SSE-KMS objects on its own. An object uploaded with a key ID
    /// is not SSE-C even in password modes, so callers check the object
    /// before sending the returned key.
    pub fn for_download(&self, bucket: &str, object: &str) -> Result<EncryptionHandle> {
        match self.policy.mode {
            EncryptionMode::Password | EncryptionMode::Auto if self.policy.key_id.is_none() => {
                match self.password_spec(bucket, object) {
                    Some(spec) => self.resolve(&spec),
                    None => Ok(EncryptionHandle::None),
                }
            }
            _ => Ok(EncryptionHandle::None),
        }
    }

    fn password_spec(&self, bucket: &str, object: &str) -> Option<EncryptionSpec> {
        self.policy
            .password
            .as_ref()
            .map(|password| EncryptionSpec::PasswordDerived {
                password: password.clone(),
                salt: format!("{}{}", bucket, object).into_bytes(),
            })
    }

    /// Turn a spec into the parameters sent to the store
    pub fn resolve(&self, spec: &EncryptionSpec) -> Result<EncryptionHandle> {
        match spec {
            EncryptionSpec::None => Ok(EncryptionHandle::None),
            EncryptionSpec::ServerManaged => Ok(EncryptionHandle::ServerManaged),
            EncryptionSpec::Kms { key_id } => {
                validate_key_id(key_id)?;
                Ok(EncryptionHandle::Kms {
                    key_id: key_id.clone(),
                })
            }
            EncryptionSpec::PasswordDerived { password, salt } => {
                if !self.policy.secure_transport {
                    return Err(Error::EncryptionConfig(
                        "password-derived encryption requires a TLS connection to the store".to_string(),
                    ));
                }
                derive_customer_key(password, salt)
            }
        }
    }
}

fn validate_key_id(key_id: &str) -> Result<()> {
    if key_id.is_empty() {
        return Err(Error::EncryptionConfig("KMS key ID is empty".to_string()));
    }
    if key_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::EncryptionConfig(format!(
            "KMS key ID '{}' contains whitespace or control characters",
            key_id.escape_debug()
        )));
    }
    Ok(())
}

/// Derive an AES-256 SSE-C key with Argon2id.
fn derive_customer_key(password: &str, salt: &[u8]) -> Result<EncryptionHandle> {
    let mut salted = SALT_DOMAIN.as_bytes().to_vec();
    salted.extend_from_slice(salt);

    let mut key = [0u8; CUSTOMER_KEY_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), &salted, &mut key)
        .map_err(|e| Error::EncryptionConfig(format!("key derivation failed: {}", e)))?;

    let key_md5 = Md5::digest(key);

    Ok(EncryptionHandle::CustomerKey {
        key: STANDARD.encode(key),
        key_md5: STANDARD.encode(key_md5),
    })
}
