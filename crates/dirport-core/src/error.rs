use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("add failed: {0}")]
    AddFailed(String),

    #[error("modify failed: {0}")]
    ModifyFailed(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("no such entry: {0}")]
    NoSuchEntry(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("import error: {0}")]
    ImportError(String),

    #[error("export error: {0}")]
    ExportError(String),

    #[error("password hashing failed: {0}")]
    HashError(String),

    #[error("plugin {plugin} failed: {message}")]
    PluginError { plugin: String, message: String },

    #[error("audit error: {0}")]
    AuditError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("credential error: {0}")]
    CredentialError(String),

    #[error("ldap error: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

impl From<csv::Error> for CoreError {
    fn from(e: csv::Error) -> Self {
        CoreError::Csv(e.to_string())
    }
}
