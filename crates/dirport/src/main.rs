use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dirport_core::audit::TracingAuditSink;
use dirport_core::config::DirportConfig;
use dirport_core::connection::{LdapConnection, TlsMode};
use dirport_core::credentials::CredentialProvider;
use dirport_core::directory::DirectoryStore;
use dirport_core::export::{ExportFormat, ExportOptions, Exporter};
use dirport_core::fields::ObjectKind;
use dirport_core::filter::validate_filter;
use dirport_core::import::csv::Delimiter;
use dirport_core::import::{ImportOptions, Importer};
use dirport_core::ldap_store::LdapDirectory;
use dirport_core::merge::{ColumnMapping, FixedValue};
use dirport_core::offline::MemoryDirectory;
use dirport_core::password::SchemeHasher;
use dirport_core::plugins::PluginRegistry;
use dirport_core::result::ImportResult;
use dirport_core::template::Template;

/// Exit code when a CSV batch is rejected by validation.
const EXIT_REJECTED: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "dirport",
    version,
    about = "Bulk CSV/LDIF import and export for LDAP directories"
)]
struct Cli {
    /// Path to config file (default: ~/.config/dirport/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Work on an LDIF snapshot instead of a server. Imports write the snapshot back.
    #[arg(long, global = true)]
    offline: Option<PathBuf>,

    /// LDAP host to connect to (overrides config)
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// LDAP port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// TLS mode: auto, ldaps, starttls or none (overrides config)
    #[arg(long, global = true)]
    tls: Option<TlsMode>,

    /// Bind DN (overrides config)
    #[arg(short = 'D', long, global = true)]
    bind_dn: Option<String>,

    /// Base DN (overrides config)
    #[arg(short, long, global = true)]
    base_dn: Option<String>,

    /// Name recorded in audit events (default: bind DN)
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import entries from a file
    #[command(subcommand)]
    Import(ImportCommand),
    /// Export entries of one kind
    Export(ExportArgs),
    /// Validate a CSV file without importing it
    Validate(ValidateArgs),
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    /// Create users, groups or custom objects from CSV rows
    Csv(CsvImportArgs),
    /// Create or update entries from LDIF
    Ldif(LdifImportArgs),
}

#[derive(Args, Debug)]
struct KindArgs {
    /// Object kind: user, group or custom
    #[arg(short, long, default_value = "user")]
    kind: String,

    /// Object class for custom objects (repeatable)
    #[arg(long = "object-class")]
    object_classes: Vec<String>,

    /// RDN attribute for custom objects
    #[arg(long)]
    rdn_attr: Option<String>,
}

impl KindArgs {
    fn resolve(&self) -> Result<ObjectKind> {
        Ok(ObjectKind::parse(
            &self.kind,
            self.object_classes.clone(),
            self.rdn_attr.clone(),
        )?)
    }
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Rename a CSV column: COLUMN=ATTRIBUTE (repeatable)
    #[arg(long = "map", value_parser = parse_pair)]
    mappings: Vec<(String, String)>,

    /// Set an attribute on every row: ATTRIBUTE=VALUE (repeatable)
    #[arg(long = "fixed", value_parser = parse_pair)]
    fixed: Vec<(String, String)>,

    /// Template file (TOML or JSON) with defaults and plugin activations
    #[arg(long)]
    template: Option<PathBuf>,

    /// Field delimiter: comma, semicolon or tab (overrides config)
    #[arg(long)]
    delimiter: Option<Delimiter>,
}

impl MergeArgs {
    fn options(&self, kind: ObjectKind, config: &DirportConfig) -> Result<ImportOptions> {
        let mut options = ImportOptions::new(kind);
        options.delimiter = self.delimiter.unwrap_or(config.import.delimiter);
        options.column_mapping = self
            .mappings
            .iter()
            .map(|(csv_column, attribute)| ColumnMapping {
                csv_column: csv_column.clone(),
                attribute: attribute.clone(),
            })
            .collect();
        options.fixed_values = self
            .fixed
            .iter()
            .map(|(attribute, value)| FixedValue {
                attribute: attribute.clone(),
                value: value.clone(),
            })
            .collect();
        if let Some(path) = &self.template {
            options.template = Some(Template::load(path)?);
        }
        Ok(options)
    }
}

#[derive(Args, Debug)]
struct CsvImportArgs {
    file: PathBuf,
    #[command(flatten)]
    kind: KindArgs,
    #[command(flatten)]
    merge: MergeArgs,
    /// Validate and build entries without writing them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct LdifImportArgs {
    file: PathBuf,
    /// Replace attributes of entries that already exist
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Output format: csv or ldif
    format: ExportFormat,
    #[command(flatten)]
    kind: KindArgs,
    /// Comma-separated attribute list
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
    /// Search base (default: the kind's container)
    #[arg(long)]
    base: Option<String>,
    /// Additional LDAP filter
    #[arg(long)]
    filter: Option<String>,
    /// LDIF line width, 0 to disable wrapping (overrides config)
    #[arg(long)]
    wrap: Option<usize>,
    /// CSV delimiter (overrides config)
    #[arg(long)]
    delimiter: Option<Delimiter>,
    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    file: PathBuf,
    #[command(flatten)]
    kind: KindArgs,
    #[command(flatten)]
    merge: MergeArgs,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// The directory a command runs against.
enum Backend {
    Offline {
        directory: MemoryDirectory,
        path: PathBuf,
    },
    Ldap(LdapDirectory),
}

impl Backend {
    fn store(&self) -> &dyn DirectoryStore {
        match self {
            Backend::Offline { directory, .. } => directory,
            Backend::Ldap(directory) => directory,
        }
    }

    /// Persist offline changes. No-op for a live server.
    fn finish(&self, wrap: usize) -> Result<()> {
        if let Backend::Offline { directory, path } = self {
            let count = directory
                .save(path, wrap)
                .with_context(|| format!("writing snapshot {}", path.display()))?;
            info!("wrote {} entries to {}", count, path.display());
        }
        Ok(())
    }

    async fn close(self) {
        if let Backend::Ldap(directory) = self {
            let mut conn = directory.into_connection();
            if let Err(e) = conn.disconnect().await {
                debug!("unbind failed: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dirport={level},dirport_core={level}",
            level = default_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => DirportConfig::load_from(path)?,
        None => DirportConfig::load(),
    };
    apply_overrides(&cli, &mut config);

    let code = run(&cli, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn apply_overrides(cli: &Cli, config: &mut DirportConfig) {
    let settings = &mut config.connection.settings;
    if let Some(host) = &cli.host {
        settings.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(tls) = cli.tls {
        settings.tls_mode = tls;
    }
    if let Some(bind_dn) = &cli.bind_dn {
        settings.bind_dn = Some(bind_dn.clone());
    }
    if let Some(base_dn) = &cli.base_dn {
        settings.base_dn = Some(base_dn.clone());
        config.directory.base_dn = base_dn.clone();
    }
}

async fn run(cli: &Cli, config: &DirportConfig) -> Result<i32> {
    if let Command::Validate(args) = &cli.command {
        return validate(args, config);
    }

    if let Command::Export(args) = &cli.command {
        if let Some(filter) = &args.filter {
            if let Err(e) = validate_filter(filter) {
                bail!("invalid --filter '{}': {}", filter, e);
            }
        }
    }

    let backend = open_backend(cli, config).await?;
    let result = execute(cli, config, &backend).await;
    backend.close().await;
    result
}

async fn execute(cli: &Cli, config: &DirportConfig, backend: &Backend) -> Result<i32> {
    let plugins = PluginRegistry::from_definitions(&config.plugins);
    let actor = cli
        .actor
        .clone()
        .or_else(|| config.connection.settings.bind_dn.clone())
        .unwrap_or_else(|| "dirport".to_string());

    let importer = Importer {
        directory: backend.store(),
        hasher: &SchemeHasher,
        audit: &TracingAuditSink,
        plugins: &plugins,
        layout: &config.directory,
        actor: actor.clone(),
    };

    let code = match &cli.command {
        Command::Import(ImportCommand::Csv(args)) => {
            let data = read_file(&args.file)?;
            let mut options = args.merge.options(args.kind.resolve()?, config)?;
            options.dry_run = args.dry_run;

            let result = importer.import_csv(&data, &options).await?;
            print_result(&result)?;
            if !args.dry_run {
                backend.finish(config.export.ldif_wrap)?;
            }
            if result.rejected() {
                EXIT_REJECTED
            } else {
                0
            }
        }
        Command::Import(ImportCommand::Ldif(args)) => {
            let data = read_file(&args.file)?;
            let content = String::from_utf8_lossy(&data);
            let overwrite = args.overwrite || config.import.overwrite;

            let result = importer.import_ldif(&content, overwrite).await;
            print_result(&result)?;
            backend.finish(config.export.ldif_wrap)?;
            0
        }
        Command::Export(args) => {
            let exporter = Exporter {
                directory: backend.store(),
                plugins: &plugins,
                audit: &TracingAuditSink,
                layout: &config.directory,
                actor,
            };
            let mut options = ExportOptions::new(args.kind.resolve()?, args.format);
            options.fields = args.fields.clone();
            options.base_dn = args.base.clone();
            options.filter = args.filter.clone();
            options.ldif_wrap = args.wrap.unwrap_or(config.export.ldif_wrap);
            options.delimiter = args.delimiter.unwrap_or(config.export.delimiter);

            let output = exporter.export(&options).await?;
            match &args.output {
                Some(path) => {
                    std::fs::write(path, &output.content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("exported {} entries to {}", output.count, path.display());
                }
                None => print!("{}", output.content),
            }
            0
        }
        Command::Validate(_) => bail!("validate runs without a directory"),
    };

    Ok(code)
}

fn validate(args: &ValidateArgs, config: &DirportConfig) -> Result<i32> {
    let data = read_file(&args.file)?;
    let options = args.merge.options(args.kind.resolve()?, config)?;
    let directory = MemoryDirectory::new();
    let plugins = PluginRegistry::from_definitions(&config.plugins);
    let importer = Importer {
        directory: &directory,
        hasher: &SchemeHasher,
        audit: &TracingAuditSink,
        plugins: &plugins,
        layout: &config.directory,
        actor: String::new(),
    };

    let errors = importer.validate_csv(&data, &options)?;
    println!("{}", serde_json::to_string_pretty(&errors)?);
    if errors.is_empty() {
        info!("{} is valid", args.file.display());
        Ok(0)
    } else {
        warn!("{} validation errors", errors.len());
        Ok(EXIT_REJECTED)
    }
}

async fn open_backend(cli: &Cli, config: &DirportConfig) -> Result<Backend> {
    if let Some(path) = &cli.offline {
        let directory = MemoryDirectory::load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        info!("offline: {} entries from {}", directory.len(), path.display());
        return Ok(Backend::Offline {
            directory,
            path: path.clone(),
        });
    }

    let settings = config.connection.settings.clone();
    if settings.host.trim().is_empty() {
        bail!("no LDAP host configured; use --host or --offline");
    }
    let host = format!("{}:{}", settings.host, settings.port);
    let bind_dn = settings.bind_dn.clone();

    let mut conn = LdapConnection::connect(settings)
        .await
        .with_context(|| format!("connecting to {}", host))?;

    match bind_dn {
        Some(bind_dn) => {
            let password = bind_password(config, &bind_dn)?;
            conn.simple_bind(&bind_dn, &password).await?;
        }
        None => conn.anonymous_bind().await?,
    }

    Ok(Backend::Ldap(LdapDirectory::new(conn)))
}

fn bind_password(config: &DirportConfig, bind_dn: &str) -> Result<String> {
    let resolved = CredentialProvider::resolve(
        config.connection.credential_method,
        bind_dn,
        config.connection.password_command.as_deref(),
    )?;
    match resolved {
        Some(password) => Ok(password),
        None => rpassword::read_password_from_tty(Some(&format!("Password for {}: ", bind_dn)))
            .context("reading bind password"),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_result(result: &ImportResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("login=uid").unwrap(),
            ("login".to_string(), "uid".to_string())
        );
        assert_eq!(
            parse_pair("description=a=b").unwrap(),
            ("description".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_pair("sn=").unwrap(), ("sn".to_string(), String::new()));
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn test_cli_parses_import() {
        let cli = Cli::try_parse_from([
            "dirport",
            "--offline",
            "snap.ldif",
            "import",
            "csv",
            "users.csv",
            "--kind",
            "user",
            "--map",
            "login=uid",
            "--fixed",
            "o=Example",
            "--delimiter",
            "semicolon",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Import(ImportCommand::Csv(args)) => {
                assert_eq!(args.merge.mappings, vec![("login".to_string(), "uid".to_string())]);
                assert_eq!(args.merge.delimiter, Some(Delimiter::Semicolon));
                assert!(args.dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_export() {
        let cli = Cli::try_parse_from([
            "dirport", "export", "ldif", "--kind", "group", "--fields", "cn,member", "--wrap", "0",
        ])
        .unwrap();
        match cli.command {
            Command::Export(args) => {
                assert_eq!(args.format, ExportFormat::Ldif);
                assert_eq!(args.fields, vec!["cn", "member"]);
                assert_eq!(args.wrap, Some(0));
                assert_eq!(args.kind.resolve().unwrap(), ObjectKind::Group);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "dirport", "-H", "ldap.test", "-b", "dc=test", "--tls", "none", "export", "csv",
        ])
        .unwrap();
        let mut config = DirportConfig::default();
        apply_overrides(&cli, &mut config);
        assert_eq!(config.connection.settings.host, "ldap.test");
        assert_eq!(config.connection.settings.tls_mode, TlsMode::None);
        assert_eq!(config.directory.base_dn, "dc=test");
    }

    #[tokio::test]
    async fn test_offline_import_writes_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = tmp.path().join("users.csv");
        std::fs::write(&csv, "uid,cn,sn\njdoe,John Doe,Doe\n").unwrap();
        let snapshot = tmp.path().join("snap.ldif");

        let cli = Cli::try_parse_from([
            "dirport",
            "--offline",
            snapshot.to_str().unwrap(),
            "-b",
            "dc=test",
            "import",
            "csv",
            csv.to_str().unwrap(),
        ])
        .unwrap();
        let mut config = DirportConfig::default();
        apply_overrides(&cli, &mut config);

        assert_eq!(run(&cli, &config).await.unwrap(), 0);
        let saved = std::fs::read_to_string(&snapshot).unwrap();
        assert!(saved.starts_with("dn: uid=jdoe,ou=users,dc=test\n"));
    }

    #[tokio::test]
    async fn test_bad_filter_rejected_before_connecting() {
        let cli = Cli::try_parse_from([
            "dirport", "-H", "", "export", "csv", "--filter", "(cn=admin",
        ])
        .unwrap();
        let mut config = DirportConfig::default();
        apply_overrides(&cli, &mut config);

        let err = run(&cli, &config).await.unwrap_err().to_string();
        assert!(err.contains("invalid --filter"), "{}", err);
        assert!(err.contains("Expected ')'"), "{}", err);
    }

    #[tokio::test]
    async fn test_command_error_still_returns_after_close() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = tmp.path().join("snap.ldif");
        let missing = tmp.path().join("missing.csv");

        let cli = Cli::try_parse_from([
            "dirport",
            "--offline",
            snapshot.to_str().unwrap(),
            "import",
            "csv",
            missing.to_str().unwrap(),
        ])
        .unwrap();
        let config = DirportConfig::default();

        let err = run(&cli, &config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("missing.csv"));
        assert!(!snapshot.exists());
    }
}
