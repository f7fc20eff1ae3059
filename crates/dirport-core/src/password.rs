//! Credential handling: nothing leaves the engine as plaintext.

use base64::Engine;
use rand::RngCore;
use serde_json::Value;
use sha2::Digest;
use tracing::debug;
use zeroize::Zeroize;

use crate::entry::AttributeMap;
use crate::error::CoreError;

/// Attribute holding the entry's secret.
pub const PASSWORD_ATTRIBUTE: &str = "userPassword";

/// Prefixes of values that are already hashed (or locked).
const HASHED_MARKERS: &[&str] = &[
    "{ssha}",
    "{ssha256}",
    "{ssha384}",
    "{ssha512}",
    "{sha}",
    "{sha256}",
    "{sha384}",
    "{sha512}",
    "{md5}",
    "{smd5}",
    "{bcrypt}",
    "{crypt}",
    "{argon2}",
    "{pbkdf2}",
    "{pbkdf2-sha256}",
    "{pbkdf2-sha512}",
    "!",
];

/// Salt length in bytes for salted schemes.
const SALT_LEN: usize = 8;

/// Turns a plaintext secret into a scheme-prefixed hash.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str, algorithm: &str) -> Result<String, CoreError>;
}

/// RFC 2307 style `{SCHEME}base64(digest[+salt])` hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemeHasher;

impl PasswordHasher for SchemeHasher {
    fn hash(&self, plaintext: &str, algorithm: &str) -> Result<String, CoreError> {
        let scheme = algorithm.trim().to_uppercase();
        let hashed = match scheme.as_str() {
            "SHA" => digest_scheme::<sha1::Sha1>("SHA", plaintext, None),
            "SSHA" => digest_scheme::<sha1::Sha1>("SSHA", plaintext, Some(&new_salt())),
            "SHA256" => digest_scheme::<sha2::Sha256>("SHA256", plaintext, None),
            "SSHA256" => digest_scheme::<sha2::Sha256>("SSHA256", plaintext, Some(&new_salt())),
            "SHA384" => digest_scheme::<sha2::Sha384>("SHA384", plaintext, None),
            "SSHA384" => digest_scheme::<sha2::Sha384>("SSHA384", plaintext, Some(&new_salt())),
            "SHA512" => digest_scheme::<sha2::Sha512>("SHA512", plaintext, None),
            "SSHA512" => digest_scheme::<sha2::Sha512>("SSHA512", plaintext, Some(&new_salt())),
            "MD5" => digest_scheme::<md5::Md5>("MD5", plaintext, None),
            "SMD5" => digest_scheme::<md5::Md5>("SMD5", plaintext, Some(&new_salt())),
            _ => {
                return Err(CoreError::HashError(format!(
                    "unsupported password algorithm '{}'",
                    algorithm
                )))
            }
        };
        Ok(hashed)
    }
}

fn new_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn digest_scheme<D: Digest>(scheme: &str, plaintext: &str, salt: Option<&[u8]>) -> String {
    let mut hasher = D::new();
    hasher.update(plaintext.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    let mut bytes = hasher.finalize().to_vec();
    if let Some(salt) = salt {
        bytes.extend_from_slice(salt);
    }
    format!(
        "{{{}}}{}",
        scheme,
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    )
}

/// Whether a value already carries a known hash scheme or lock marker.
pub fn is_hashed(value: &str) -> bool {
    let lower = value.trim_start().to_lowercase();
    HASHED_MARKERS.iter().any(|m| lower.starts_with(m))
}

/// The single gate every password value passes before a directory write.
pub struct CredentialGuard<'a> {
    hasher: &'a dyn PasswordHasher,
    algorithm: String,
}

impl<'a> CredentialGuard<'a> {
    pub fn new(hasher: &'a dyn PasswordHasher, algorithm: impl Into<String>) -> Self {
        Self {
            hasher,
            algorithm: algorithm.into(),
        }
    }

    /// Return the value unchanged if already hashed, otherwise its hash.
    pub fn ensure_hashed(&self, value: &str) -> Result<String, CoreError> {
        if is_hashed(value) {
            return Ok(value.to_string());
        }
        self.hasher.hash(value, &self.algorithm)
    }

    /// Hash every password value in `attrs` in place. Plaintext is wiped.
    pub fn protect(&self, attrs: &mut AttributeMap) -> Result<(), CoreError> {
        for (attr, values) in attrs.iter_mut() {
            if !attr.eq_ignore_ascii_case(PASSWORD_ATTRIBUTE) {
                continue;
            }
            for value in values.iter_mut() {
                if is_hashed(value) {
                    continue;
                }
                let mut plaintext = std::mem::take(value);
                let hashed = self.hasher.hash(&plaintext, &self.algorithm);
                plaintext.zeroize();
                *value = hashed?;
                debug!("hashed {} with {}", attr, self.algorithm);
            }
        }
        Ok(())
    }

    /// Hash password values inside a plugin activation payload.
    ///
    /// Scalars under the password key are hashed as strings, arrays element by
    /// element. Anything else under that key is rejected.
    pub fn protect_payload(&self, config: &mut Value) -> Result<(), CoreError> {
        let Value::Object(map) = config else {
            return Ok(());
        };
        for (attr, value) in map.iter_mut() {
            if !attr.eq_ignore_ascii_case(PASSWORD_ATTRIBUTE) {
                continue;
            }
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        self.protect_scalar(item)?;
                    }
                }
                other => self.protect_scalar(other)?,
            }
        }
        Ok(())
    }

    fn protect_scalar(&self, value: &mut Value) -> Result<(), CoreError> {
        let mut plaintext = match std::mem::take(value) {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Null => return Ok(()),
            _ => {
                return Err(CoreError::HashError(format!(
                    "{} must be a string",
                    PASSWORD_ATTRIBUTE
                )))
            }
        };
        let hashed = self.ensure_hashed(&plaintext);
        plaintext.zeroize();
        *value = Value::String(hashed?);
        Ok(())
    }
}
