pub mod csv;
pub mod ldif;

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;

use crate::audit::{emit, AuditAction, AuditEvent, AuditSink};
use crate::config::DirectoryConfig;
use crate::directory::DirectoryStore;
use crate::entry::LdapEntry;
use crate::error::CoreError;
use crate::fields::ObjectKind;
use crate::import::csv::Delimiter;
use crate::plugins::PluginRegistry;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExportFormat {
    Csv,
    Ldif,
}

impl ExportFormat {
    /// Infer format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "ldif" | "ldf" => Some(Self::Ldif),
            "csv" | "tsv" => Some(Self::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub kind: ObjectKind,
    pub format: ExportFormat,
    /// Explicit column list. Empty means the kind's preset, or every observed attribute.
    pub fields: Vec<String>,
    /// Search base. Defaults to the kind's container.
    pub base_dn: Option<String>,
    /// Extra filter ANDed with the kind's object class filter.
    pub filter: Option<String>,
    pub ldif_wrap: usize,
    pub delimiter: Delimiter,
}

impl ExportOptions {
    pub fn new(kind: ObjectKind, format: ExportFormat) -> Self {
        Self {
            kind,
            format,
            fields: Vec::new(),
            base_dn: None,
            filter: None,
            ldif_wrap: ldif::DEFAULT_WRAP,
            delimiter: Delimiter::default(),
        }
    }
}

/// Rendered export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutput {
    pub content: String,
    pub count: usize,
    pub fields: Vec<String>,
}

/// Choose export columns.
///
/// Explicit fields win. Otherwise the kind's preset, extended by plugin
/// fields. Kinds without a preset get every attribute seen in `entries`, in
/// first-seen order, without the DN.
pub fn select_fields(
    kind: &ObjectKind,
    explicit: &[String],
    entries: &[LdapEntry],
    plugins: &PluginRegistry,
) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    let mut push = |field: &str| {
        let field = field.trim();
        if !field.is_empty() && !fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            fields.push(field.to_string());
        }
    };

    if !explicit.is_empty() {
        explicit.iter().for_each(|f| push(f));
    } else if let Some(preset) = kind.export_preset() {
        preset.iter().for_each(|f| push(f));
        plugins.extra_fields(kind).allowed.iter().for_each(|f| push(f));
    } else {
        entries
            .iter()
            .flat_map(|e| e.attributes.keys())
            .filter(|k| !k.eq_ignore_ascii_case("dn"))
            .for_each(|k| push(k));
    }

    fields
}

/// Keep only the selected attributes (and `objectClass`) of each entry.
fn project(entries: Vec<LdapEntry>, fields: &[String]) -> Vec<LdapEntry> {
    entries
        .into_iter()
        .map(|mut entry| {
            entry.attributes.retain(|attr, _| {
                attr.eq_ignore_ascii_case("objectClass")
                    || fields.iter().any(|f| f.eq_ignore_ascii_case(attr))
            });
            entry
        })
        .collect()
}

/// Reads entries of one kind and renders them as CSV or LDIF.
pub struct Exporter<'a> {
    pub directory: &'a dyn DirectoryStore,
    pub plugins: &'a PluginRegistry,
    pub audit: &'a dyn AuditSink,
    pub layout: &'a DirectoryConfig,
    pub actor: String,
}

impl<'a> Exporter<'a> {
    fn base_for(&self, options: &ExportOptions) -> String {
        if let Some(base) = options.base_dn.as_ref().filter(|b| !b.trim().is_empty()) {
            return base.clone();
        }
        match options.kind {
            ObjectKind::User => self.layout.users_container(),
            ObjectKind::Group => self.layout.groups_container(),
            ObjectKind::Custom { .. } => self.layout.base_dn.clone(),
        }
    }

    fn filter_for(options: &ExportOptions) -> String {
        let kind_filter = options.kind.search_filter();
        match options.filter.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => format!("(&{}{})", kind_filter, f),
            _ => kind_filter,
        }
    }

    pub async fn export(&self, options: &ExportOptions) -> Result<ExportOutput, CoreError> {
        let base = self.base_for(options);
        let filter = Self::filter_for(options);
        let entity_type = options.kind.to_string();
        let format = options.format.to_string();

        let entries = match self.directory.search(&base, &filter).await {
            Ok(entries) => entries,
            Err(e) => {
                emit(
                    self.audit,
                    AuditEvent::failure(
                        &self.actor,
                        AuditAction::Export,
                        &entity_type,
                        &base,
                        &format,
                        e.to_string(),
                    ),
                );
                return Err(e);
            }
        };

        let fields = select_fields(&options.kind, &options.fields, &entries, self.plugins);
        let rendered = self.render(options, entries, &fields);

        match &rendered {
            Ok((_, count)) => {
                info!(kind = %entity_type, format = %format, base = %base, "exported {} entries", count);
                emit(
                    self.audit,
                    AuditEvent::success(&self.actor, AuditAction::Export, &entity_type, &base, &format),
                );
            }
            Err(e) => emit(
                self.audit,
                AuditEvent::failure(
                    &self.actor,
                    AuditAction::Export,
                    &entity_type,
                    &base,
                    &format,
                    e.to_string(),
                ),
            ),
        }

        let (content, count) = rendered?;
        Ok(ExportOutput {
            content,
            count,
            fields,
        })
    }

    fn render(
        &self,
        options: &ExportOptions,
        entries: Vec<LdapEntry>,
        fields: &[String],
    ) -> Result<(String, usize), CoreError> {
        match options.format {
            ExportFormat::Csv => {
                let mut buf = Vec::new();
                let count = csv::write_csv(&mut buf, &entries, fields, options.delimiter)?;
                let content = String::from_utf8(buf)
                    .map_err(|e| CoreError::ExportError(format!("Invalid UTF-8 output: {}", e)))?;
                Ok((content, count))
            }
            ExportFormat::Ldif => {
                let entries = project(entries, fields);
                Ok((ldif::to_string(&entries, options.ldif_wrap), entries.len()))
            }
        }
    }
}
