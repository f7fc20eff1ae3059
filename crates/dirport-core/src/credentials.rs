use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::CoreError;

const KEYCHAIN_SERVICE: &str = "dirport";

/// Environment variable read by [`CredentialMethod::Env`].
pub const PASSWORD_ENV: &str = "DIRPORT_BIND_PASSWORD";

/// How to obtain the bind password for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CredentialMethod {
    /// Ask on the terminal. Resolved by the caller.
    #[default]
    Prompt,
    Command,
    Keychain,
    Env,
}

/// Resolve a password using the configured credential method.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Resolve a password for every method except [`CredentialMethod::Prompt`].
    ///
    /// Returns `Ok(None)` for `Prompt`.
    pub fn resolve(
        method: CredentialMethod,
        account: &str,
        password_command: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        match method {
            CredentialMethod::Prompt => Ok(None),
            CredentialMethod::Command => {
                let command = password_command.ok_or_else(|| {
                    CoreError::CredentialError(
                        "credential_method is 'command' but no password_command is set"
                            .to_string(),
                    )
                })?;
                Self::from_command(command).map(Some)
            }
            CredentialMethod::Keychain => Self::from_keychain(account).map(Some),
            CredentialMethod::Env => Self::from_env(PASSWORD_ENV).map(Some),
        }
    }

    /// Get password from a shell command (stdout, trimmed).
    pub fn from_command(command: &str) -> Result<String, CoreError> {
        debug!("Running password command");
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| CoreError::CredentialError(format!("Failed to run command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::CredentialError(format!(
                "Password command failed ({}): {}",
                output.status, stderr
            )));
        }

        let password = String::from_utf8(output.stdout)
            .map_err(|e| CoreError::CredentialError(format!("Invalid UTF-8 in password: {}", e)))?
            .trim_end_matches('\n')
            .trim_end_matches('\r')
            .to_string();

        Ok(password)
    }

    /// Get password from an environment variable.
    pub fn from_env(var: &str) -> Result<String, CoreError> {
        std::env::var(var)
            .map_err(|_| CoreError::CredentialError(format!("{} is not set", var)))
    }

    /// Get password from the OS keychain.
    pub fn from_keychain(account: &str) -> Result<String, CoreError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, account)
            .map_err(|e| CoreError::CredentialError(format!("Keychain access failed: {}", e)))?;

        entry
            .get_password()
            .map_err(|e| CoreError::CredentialError(format!("Keychain get failed: {}", e)))
    }

    /// Store a password in the OS keychain.
    pub fn store_in_keychain(account: &str, password: &str) -> Result<(), CoreError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, account)
            .map_err(|e| CoreError::CredentialError(format!("Keychain access failed: {}", e)))?;

        entry
            .set_password(password)
            .map_err(|e| CoreError::CredentialError(format!("Keychain store failed: {}", e)))
    }

    /// Delete a password from the OS keychain. Missing entries are not an error.
    pub fn delete_from_keychain(account: &str) -> Result<(), CoreError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, account)
            .map_err(|e| CoreError::CredentialError(format!("Keychain access failed: {}", e)))?;

        if let Err(e) = entry.delete_credential() {
            warn!("Keychain delete warning: {}", e);
        }
        Ok(())
    }
}
