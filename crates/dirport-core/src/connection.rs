use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::error::CoreError;

/// TLS mode for LDAP connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TlsMode {
    #[default]
    Auto,
    Ldaps,
    StartTls,
    None,
}

/// Settings for an LDAP connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_mode: TlsMode,
    pub bind_dn: Option<String>,
    pub base_dn: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_mode: TlsMode::default(),
            bind_dn: None,
            base_dn: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    389
}
fn default_page_size() -> u32 {
    500
}
fn default_timeout() -> u64 {
    30
}

/// 636 when the configured port is the plain default, else the configured port.
fn ldaps_port(port: u16) -> u16 {
    if port == 389 {
        636
    } else {
        port
    }
}

async fn open(host: &str, port: u16, mode: TlsMode, timeout: Duration) -> Result<Ldap, CoreError> {
    let scheme = if mode == TlsMode::Ldaps { "ldaps" } else { "ldap" };
    let url = format!("{}://{}:{}", scheme, host, port);
    let conn_settings = LdapConnSettings::new()
        .set_conn_timeout(timeout)
        .set_starttls(mode == TlsMode::StartTls);

    let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, &url)
        .await
        .map_err(|e| CoreError::ConnectionFailed(format!("{} {}: {}", mode, url, e)))?;
    ldap3::drive!(conn);
    Ok(ldap)
}

/// An open, bound LDAP connection.
pub struct LdapConnection {
    pub ldap: Ldap,
    pub settings: ConnectionSettings,
}

impl LdapConnection {
    /// Open a connection according to `settings.tls_mode`. No bind is performed.
    pub async fn connect(settings: ConnectionSettings) -> Result<Self, CoreError> {
        let timeout = Duration::from_secs(settings.timeout_secs);

        let ldap = match settings.tls_mode {
            TlsMode::Auto => Self::negotiate(&settings, timeout).await?,
            mode => open(&settings.host, settings.port, mode, timeout).await?,
        };

        Ok(Self { ldap, settings })
    }

    /// Try LDAPS, then StartTLS, then plain. The last failure is returned.
    async fn negotiate(settings: &ConnectionSettings, timeout: Duration) -> Result<Ldap, CoreError> {
        let attempts = [
            (TlsMode::Ldaps, ldaps_port(settings.port)),
            (TlsMode::StartTls, settings.port),
            (TlsMode::None, settings.port),
        ];

        let mut last_err = None;
        for (mode, port) in attempts {
            match open(&settings.host, port, mode, timeout).await {
                Ok(ldap) => {
                    info!(host = %settings.host, port, "connected ({})", mode);
                    return Ok(ldap);
                }
                Err(e) => {
                    warn!(host = %settings.host, port, "{} failed: {}", mode, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoreError::ConnectionFailed(format!("no transport for {}", settings.host))
        }))
    }

    /// Perform a simple bind with the given DN and password.
    pub async fn simple_bind(&mut self, bind_dn: &str, password: &str) -> Result<(), CoreError> {
        let result = self
            .ldap
            .simple_bind(bind_dn, password)
            .await
            .map_err(CoreError::Ldap)?;

        if result.rc != 0 {
            return Err(CoreError::BindFailed(format!(
                "LDAP bind returned rc={}: {}",
                result.rc, result.text
            )));
        }

        info!("Bound as {}", bind_dn);
        Ok(())
    }

    /// Perform an anonymous bind.
    pub async fn anonymous_bind(&mut self) -> Result<(), CoreError> {
        let result = self
            .ldap
            .simple_bind("", "")
            .await
            .map_err(CoreError::Ldap)?;

        if result.rc != 0 {
            return Err(CoreError::BindFailed(format!(
                "Anonymous bind returned rc={}: {}",
                result.rc, result.text
            )));
        }

        info!("Bound anonymously");
        Ok(())
    }

    /// Unbind and close the connection.
    pub async fn disconnect(&mut self) -> Result<(), CoreError> {
        self.ldap.unbind().await.map_err(CoreError::Ldap)
    }
}
