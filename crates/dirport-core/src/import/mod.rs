pub mod csv;
pub mod ldif;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::audit::{emit, AuditAction, AuditEvent, AuditSink};
use crate::builder::{build_entry, BuiltEntry};
use crate::config::DirectoryConfig;
use crate::directory::DirectoryStore;
use crate::dn;
use crate::entry::{first_value, remove_ci, AttributeMap, LdapEntry};
use crate::error::CoreError;
use crate::fields::{FieldSchema, ObjectKind};
use crate::import::csv::{read_csv, Delimiter, Row};
use crate::merge::{ColumnMapping, FixedValue, MergePlan};
use crate::password::{CredentialGuard, PasswordHasher};
use crate::plugins::{resolve_activations, PluginRegistry};
use crate::result::{ImportResult, ValidationError};
use crate::template::Template;
use crate::validate::validate_rows;

/// Options for one CSV import call.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub kind: ObjectKind,
    pub delimiter: Delimiter,
    pub column_mapping: Vec<ColumnMapping>,
    pub fixed_values: Vec<FixedValue>,
    pub template: Option<Template>,
    /// Only used by LDIF imports.
    pub overwrite: bool,
    /// Validate and build every entry without writing.
    pub dry_run: bool,
}

impl ImportOptions {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            delimiter: Delimiter::default(),
            column_mapping: Vec::new(),
            fixed_values: Vec::new(),
            template: None,
            overwrite: false,
            dry_run: false,
        }
    }

    fn plan(&self) -> MergePlan {
        MergePlan {
            mapping: self.column_mapping.clone(),
            defaults: self
                .template
                .as_ref()
                .map(|t| t.defaults.clone())
                .unwrap_or_default(),
            fixed: self.fixed_values.clone(),
        }
    }

    fn explicit_activations(&self) -> BTreeMap<String, Value> {
        self.template
            .as_ref()
            .map(|t| t.plugin_activations.clone())
            .unwrap_or_default()
    }
}

/// Writes CSV rows and LDIF entries into a directory.
///
/// Rows are processed one at a time in source order. A failing row is
/// recorded and skipped; the rest of the batch carries on.
pub struct Importer<'a> {
    pub directory: &'a dyn DirectoryStore,
    pub hasher: &'a dyn PasswordHasher,
    pub audit: &'a dyn AuditSink,
    pub plugins: &'a PluginRegistry,
    pub layout: &'a DirectoryConfig,
    pub actor: String,
}

/// Everything fixed for one CSV batch.
struct Batch<'b> {
    kind: &'b ObjectKind,
    schema: FieldSchema,
    plan: MergePlan,
    explicit: BTreeMap<String, Value>,
    owned: Vec<String>,
    guard: CredentialGuard<'b>,
    dry_run: bool,
}

impl<'a> Importer<'a> {
    fn guard(&self) -> CredentialGuard<'a> {
        CredentialGuard::new(self.hasher, self.layout.password_algorithm.clone())
    }

    fn schema(&self, kind: &ObjectKind) -> FieldSchema {
        FieldSchema::for_kind(kind, &self.plugins.extra_fields(kind))
    }

    /// Run row validation only. Custom kinds always validate clean.
    pub fn validate_csv(
        &self,
        data: &[u8],
        options: &ImportOptions,
    ) -> Result<Vec<ValidationError>, CoreError> {
        let table = read_csv(data, options.delimiter)?;
        Ok(validate_rows(
            &table.rows,
            &options.kind,
            &self.schema(&options.kind),
            &options.plan(),
        ))
    }

    /// Import CSV data.
    ///
    /// Users and groups are validated up front; any validation error rejects
    /// the whole batch before a single write and is returned in `errors`.
    pub async fn import_csv(
        &self,
        data: &[u8],
        options: &ImportOptions,
    ) -> Result<ImportResult, CoreError> {
        let table = read_csv(data, options.delimiter)?;
        let mut result = ImportResult::new(table.rows.len());

        let batch = Batch {
            kind: &options.kind,
            schema: self.schema(&options.kind),
            plan: options.plan(),
            explicit: options.explicit_activations(),
            owned: self.plugins.owned_fields(&options.kind),
            guard: self.guard(),
            dry_run: options.dry_run,
        };

        if !options.kind.is_custom() {
            let errors = validate_rows(&table.rows, batch.kind, &batch.schema, &batch.plan);
            if !errors.is_empty() {
                warn!(
                    kind = %options.kind,
                    "rejected batch of {} rows: {} validation errors",
                    table.rows.len(),
                    errors.len()
                );
                result.errors = errors;
                return Ok(result);
            }
        }

        let entity_type = options.kind.to_string();
        for row in &table.rows {
            let attrs = batch.plan.merge(row);
            let ident = first_value(&attrs, options.kind.rdn_attr())
                .unwrap_or_default()
                .to_string();

            match self.import_row(row, attrs, &batch).await {
                Ok(built) => {
                    result.created += 1;
                    if !batch.dry_run {
                        emit(
                            self.audit,
                            AuditEvent::success(
                                &self.actor,
                                AuditAction::Import,
                                &entity_type,
                                &built.dn,
                                &built.name,
                            ),
                        );
                    }
                }
                Err(e) => {
                    warn!(row = row.index, ident = %ident, "row skipped: {}", e);
                    emit(
                        self.audit,
                        AuditEvent::failure(
                            &self.actor,
                            AuditAction::Import,
                            &entity_type,
                            &ident,
                            &ident,
                            e.to_string(),
                        ),
                    );
                    result.skip(ValidationError::new(row.index, ident, e.to_string()));
                }
            }
        }

        info!(
            kind = %options.kind,
            total = result.total_rows,
            created = result.created,
            skipped = result.skipped,
            dry_run = options.dry_run,
            "CSV import finished"
        );
        Ok(result)
    }

    async fn import_row(
        &self,
        row: &Row,
        mut attrs: AttributeMap,
        batch: &Batch<'_>,
    ) -> Result<BuiltEntry, CoreError> {
        batch.guard.protect(&mut attrs)?;
        let activations = resolve_activations(batch.kind, &attrs, &batch.explicit, self.plugins);
        let built = build_entry(batch.kind, attrs, &batch.schema, self.layout, &batch.owned)?;

        if batch.dry_run {
            if self.directory.exists(&built.dn).await? {
                return Err(CoreError::AlreadyExists(built.dn));
            }
            debug!(row = row.index, dn = %built.dn, "dry run: would create");
            return Ok(built);
        }

        self.directory
            .create(&built.dn, &built.object_classes, &built.attributes)
            .await?;
        debug!(row = row.index, dn = %built.dn, "created");

        for activation in &activations {
            match self
                .plugins
                .activate(self.directory, &built.dn, activation, &batch.guard)
                .await
            {
                Ok(()) => debug!(dn = %built.dn, plugin = %activation.plugin, "activated"),
                Err(e) => warn!(dn = %built.dn, "plugin activation failed: {}", e),
            }
        }

        Ok(built)
    }

    /// CSV import of users.
    pub async fn import_users_from_csv(
        &self,
        data: &[u8],
        mut options: ImportOptions,
    ) -> Result<ImportResult, CoreError> {
        options.kind = ObjectKind::User;
        self.import_csv(data, &options).await
    }

    /// CSV import of groups.
    pub async fn import_groups_from_csv(
        &self,
        data: &[u8],
        mut options: ImportOptions,
    ) -> Result<ImportResult, CoreError> {
        options.kind = ObjectKind::Group;
        self.import_csv(data, &options).await
    }

    /// Import LDIF content.
    ///
    /// Existing entries are skipped, or with `overwrite` have every listed
    /// attribute replaced. Error rows are the 1-based entry position.
    pub async fn import_ldif(&self, content: &str, overwrite: bool) -> ImportResult {
        let doc = ldif::parse_document(content);
        if doc.dropped > 0 {
            warn!("{} LDIF records without a dn were ignored", doc.dropped);
        }

        let mut result = ImportResult::new(doc.entries.len());
        let guard = self.guard();

        for (i, entry) in doc.entries.into_iter().enumerate() {
            let position = i + 1;
            let name = dn::rdn_value(&entry.dn).to_string();

            match self.import_entry(&entry, overwrite, &guard).await {
                Ok(LdifOutcome::Created) => result.created += 1,
                Ok(LdifOutcome::Updated) => result.updated += 1,
                Ok(LdifOutcome::Skipped) => {
                    debug!(dn = %entry.dn, "exists, skipped");
                    result.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(entry = position, dn = %entry.dn, "entry skipped: {}", e);
                    emit(
                        self.audit,
                        AuditEvent::failure(
                            &self.actor,
                            AuditAction::Import,
                            "entry",
                            &entry.dn,
                            &name,
                            e.to_string(),
                        ),
                    );
                    result.skip(ValidationError::new(position, entry.dn.clone(), e.to_string()));
                    continue;
                }
            }

            emit(
                self.audit,
                AuditEvent::success(&self.actor, AuditAction::Import, "entry", &entry.dn, &name),
            );
        }

        info!(
            total = result.total_rows,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            "LDIF import finished"
        );
        result
    }

    async fn import_entry(
        &self,
        entry: &LdapEntry,
        overwrite: bool,
        guard: &CredentialGuard<'_>,
    ) -> Result<LdifOutcome, CoreError> {
        let exists = self.directory.exists(&entry.dn).await?;
        if exists && !overwrite {
            return Ok(LdifOutcome::Skipped);
        }

        let mut attrs = entry.attributes.clone();
        guard.protect(&mut attrs)?;

        if exists {
            self.directory.replace(&entry.dn, &attrs).await?;
            return Ok(LdifOutcome::Updated);
        }

        let object_classes = remove_ci(&mut attrs, "objectClass").unwrap_or_default();
        self.directory
            .create(&entry.dn, &object_classes, &attrs)
            .await?;
        Ok(LdifOutcome::Created)
    }
}

enum LdifOutcome {
    Created,
    Updated,
    Skipped,
}
