//! Feature plugins layered on top of a created entry.
//!
//! A plugin contributes fields to the import schema and knows how to turn an
//! existing entry into one carrying its feature (an extra object class plus
//! attributes). Which plugins run for a row comes from an explicit activation
//! map, or from the indicator table when the row carries a plugin's attributes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::directory::DirectoryStore;
use crate::entry::{find_key, first_value, AttributeMap};
use crate::error::CoreError;
use crate::fields::{ExtraFields, FieldSchema, ObjectKind};
use crate::password::CredentialGuard;

/// Builds an activation payload from a merged row and the plugin's fields.
pub type Projection = fn(&AttributeMap, &[String]) -> Value;

#[async_trait]
pub trait FeaturePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Extra fields this plugin contributes for an object kind.
    fn fields(&self, kind: &ObjectKind) -> ExtraFields;

    async fn is_active(&self, directory: &dyn DirectoryStore, dn: &str) -> Result<bool, CoreError>;

    async fn activate(
        &self,
        directory: &dyn DirectoryStore,
        dn: &str,
        config: &Value,
    ) -> Result<(), CoreError>;
}

/// Row attributes whose presence requests a plugin.
#[derive(Clone)]
pub struct Indicator {
    pub plugin: String,
    pub attributes: Vec<String>,
    pub project: Projection,
}

impl std::fmt::Debug for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indicator")
            .field("plugin", &self.plugin)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// A plugin to run against a freshly created entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub plugin: String,
    pub config: Value,
    /// True when requested by the template rather than detected.
    pub explicit: bool,
}

/// Collect every present field into `{attr: [values]}`.
pub fn project_present(attrs: &AttributeMap, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        let Some(key) = find_key(attrs, field) else {
            continue;
        };
        let values: Vec<Value> = attrs[key]
            .iter()
            .filter(|v| !v.trim().is_empty())
            .map(|v| Value::String(v.clone()))
            .collect();
        if !values.is_empty() {
            out.insert(field.clone(), Value::Array(values));
        }
    }
    Value::Object(out)
}

/// Turn an activation payload into attribute values.
///
/// Accepts strings, numbers, booleans and arrays of those. `null` is ignored.
pub fn payload_attributes(plugin: &str, config: &Value) -> Result<AttributeMap, CoreError> {
    let invalid = |message: String| CoreError::PluginError {
        plugin: plugin.to_string(),
        message,
    };

    let object = match config {
        Value::Null => return Ok(AttributeMap::new()),
        Value::Object(map) => map,
        other => return Err(invalid(format!("expected an object, got {}", other))),
    };

    let mut attrs = AttributeMap::new();
    for (attr, value) in object {
        let values = match value {
            Value::Null => continue,
            Value::Array(items) => items
                .iter()
                .map(scalar)
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| invalid(format!("unsupported value for {}", attr)))?,
            other => vec![scalar(other).ok_or_else(|| invalid(format!("unsupported value for {}", attr)))?],
        };
        if !values.is_empty() {
            attrs.insert(attr.clone(), values);
        }
    }
    Ok(attrs)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        _ => None,
    }
}

/// Declarative plugin: adds one object class plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub name: String,
    pub object_class: String,
    /// Row attributes that request this plugin when present.
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub user_fields: Vec<String>,
    #[serde(default)]
    pub group_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectClassPlugin {
    def: PluginDefinition,
}

impl ObjectClassPlugin {
    pub fn new(def: PluginDefinition) -> Self {
        Self { def }
    }

    pub fn definition(&self) -> &PluginDefinition {
        &self.def
    }

    pub fn posix() -> Self {
        Self::new(PluginDefinition {
            name: "posix".to_string(),
            object_class: "posixAccount".to_string(),
            indicators: strings(&["uidNumber", "gidNumber", "homeDirectory", "loginShell"]),
            user_fields: strings(&["uidNumber", "gidNumber", "homeDirectory", "loginShell", "gecos"]),
            group_fields: strings(&["gidNumber"]),
        })
    }

    pub fn ssh() -> Self {
        Self::new(PluginDefinition {
            name: "ssh".to_string(),
            object_class: "ldapPublicKey".to_string(),
            indicators: strings(&["sshPublicKey"]),
            user_fields: strings(&["sshPublicKey"]),
            group_fields: Vec::new(),
        })
    }

    pub fn mail() -> Self {
        Self::new(PluginDefinition {
            name: "mail".to_string(),
            object_class: "mailRecipient".to_string(),
            indicators: strings(&["mailHost", "mailQuota", "mailAlternateAddress"]),
            user_fields: strings(&["mailHost", "mailQuota", "mailAlternateAddress"]),
            group_fields: Vec::new(),
        })
    }

    /// Object class for a kind. POSIX groups use `posixGroup`.
    fn object_class_for(&self, dn_classes: &[&str]) -> &str {
        if self.def.object_class.eq_ignore_ascii_case("posixAccount")
            && dn_classes
                .iter()
                .any(|oc| oc.eq_ignore_ascii_case(crate::fields::GROUP_OBJECT_CLASS))
        {
            "posixGroup"
        } else {
            &self.def.object_class
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl FeaturePlugin for ObjectClassPlugin {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn fields(&self, kind: &ObjectKind) -> ExtraFields {
        let allowed = match kind {
            ObjectKind::User => self.def.user_fields.clone(),
            ObjectKind::Group => self.def.group_fields.clone(),
            ObjectKind::Custom { .. } => Vec::new(),
        };
        ExtraFields {
            required: Vec::new(),
            allowed,
        }
    }

    async fn is_active(&self, directory: &dyn DirectoryStore, dn: &str) -> Result<bool, CoreError> {
        let entry = directory
            .get(dn)
            .await?
            .ok_or_else(|| CoreError::NoSuchEntry(dn.to_string()))?;
        let classes = entry.object_classes();
        let class = self.object_class_for(&classes);
        Ok(entry.has_object_class(class))
    }

    async fn activate(
        &self,
        directory: &dyn DirectoryStore,
        dn: &str,
        config: &Value,
    ) -> Result<(), CoreError> {
        let entry = directory
            .get(dn)
            .await?
            .ok_or_else(|| CoreError::NoSuchEntry(dn.to_string()))?;

        let mut classes: Vec<String> = entry.object_classes().iter().map(|s| s.to_string()).collect();
        let class = {
            let refs: Vec<&str> = classes.iter().map(String::as_str).collect();
            self.object_class_for(&refs).to_string()
        };
        if !classes.iter().any(|oc| oc.eq_ignore_ascii_case(&class)) {
            classes.push(class.clone());
        }

        let mut changes = payload_attributes(&self.def.name, config)?;
        changes.insert("objectClass".to_string(), classes);
        directory.replace(dn, &changes).await?;

        info!(plugin = %self.def.name, dn = %dn, "added {}", class);
        Ok(())
    }
}

/// The plugins available to one import or export call.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn FeaturePlugin>>,
    indicators: Vec<Indicator>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("indicators", &self.indicators)
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in posix, ssh and mail plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for plugin in [
            ObjectClassPlugin::posix(),
            ObjectClassPlugin::ssh(),
            ObjectClassPlugin::mail(),
        ] {
            registry.register_definition(plugin);
        }
        registry
    }

    /// Built-ins plus declarative plugins from configuration.
    pub fn from_definitions(defs: &[PluginDefinition]) -> Self {
        let mut registry = Self::with_builtins();
        for def in defs {
            registry.register_definition(ObjectClassPlugin::new(def.clone()));
        }
        registry
    }

    fn register_definition(&mut self, plugin: ObjectClassPlugin) {
        let indicators = plugin.definition().indicators.clone();
        self.register(Arc::new(plugin), indicators, project_present);
    }

    /// Add a plugin. A plugin registered under an existing name replaces it.
    pub fn register(
        &mut self,
        plugin: Arc<dyn FeaturePlugin>,
        indicators: Vec<String>,
        project: Projection,
    ) {
        let name = plugin.name().to_string();
        self.plugins.retain(|p| p.name() != name);
        self.indicators.retain(|i| i.plugin != name);

        if !indicators.is_empty() {
            self.indicators.push(Indicator {
                plugin: name.clone(),
                attributes: indicators,
                project,
            });
        }
        debug!("registered plugin {}", name);
        self.plugins.push(plugin);
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FeaturePlugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn indicator(&self, name: &str) -> Option<&Indicator> {
        self.indicators.iter().find(|i| i.plugin == name)
    }

    /// Union of all plugin fields for a kind, in registration order.
    pub fn extra_fields(&self, kind: &ObjectKind) -> ExtraFields {
        let mut extra = ExtraFields::default();
        for plugin in &self.plugins {
            let fields = plugin.fields(kind);
            push_unique(&mut extra.required, fields.required);
            push_unique(&mut extra.allowed, fields.allowed);
        }
        extra
    }

    /// Plugin fields that the base schema of `kind` does not accept.
    ///
    /// These travel through activation instead of the primary entry.
    pub fn owned_fields(&self, kind: &ObjectKind) -> Vec<String> {
        if kind.is_custom() {
            return Vec::new();
        }
        let base = FieldSchema::for_kind(kind, &ExtraFields::default());
        let extra = self.extra_fields(kind);
        extra
            .required
            .into_iter()
            .chain(extra.allowed)
            .filter(|f| !base.is_allowed(f))
            .collect()
    }

    /// Run one activation against `dn`. Already-active plugins are left alone.
    ///
    /// Password values in the payload pass through `guard` before the plugin sees them.
    pub async fn activate(
        &self,
        directory: &dyn DirectoryStore,
        dn: &str,
        activation: &Activation,
        guard: &CredentialGuard<'_>,
    ) -> Result<(), CoreError> {
        let plugin_error = |message: String| CoreError::PluginError {
            plugin: activation.plugin.clone(),
            message,
        };

        let plugin = self
            .get(&activation.plugin)
            .ok_or_else(|| plugin_error("plugin is not registered".to_string()))?;

        if plugin
            .is_active(directory, dn)
            .await
            .map_err(|e| plugin_error(e.to_string()))?
        {
            debug!(plugin = %activation.plugin, dn = %dn, "already active");
            return Ok(());
        }

        let mut config = activation.config.clone();
        guard
            .protect_payload(&mut config)
            .map_err(|e| plugin_error(e.to_string()))?;

        plugin
            .activate(directory, dn, &config)
            .await
            .map_err(|e| match e {
                e @ CoreError::PluginError { .. } => e,
                other => plugin_error(other.to_string()),
            })
    }
}

fn push_unique(into: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !into.iter().any(|i| i.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}

/// Decide which plugins to activate for a merged row.
///
/// Explicit activations always apply, with row values for the plugin's
/// fields filling keys the explicit config leaves out. Other plugins are
/// activated when any of their indicator attributes is present. Order
/// follows the registry; explicit names the registry does not know come last.
pub fn resolve_activations(
    kind: &ObjectKind,
    attrs: &AttributeMap,
    explicit: &BTreeMap<String, Value>,
    registry: &PluginRegistry,
) -> Vec<Activation> {
    let mut activations = Vec::new();

    for plugin in &registry.plugins {
        let name = plugin.name();
        let fields = plugin.fields(kind).allowed;
        let indicator = registry.indicator(name);
        let project = indicator.map(|i| i.project).unwrap_or(project_present);

        if let Some(config) = explicit.get(name) {
            let mut config = config.clone();
            if let (Value::Object(given), Value::Object(detected)) =
                (&mut config, project(attrs, &fields))
            {
                for (k, v) in detected {
                    given.entry(k).or_insert(v);
                }
            }
            activations.push(Activation {
                plugin: name.to_string(),
                config,
                explicit: true,
            });
            continue;
        }

        let Some(indicator) = indicator else {
            continue;
        };
        if fields.is_empty() {
            continue;
        }
        if indicator
            .attributes
            .iter()
            .any(|a| first_value(attrs, a).is_some())
        {
            activations.push(Activation {
                plugin: name.to_string(),
                config: (indicator.project)(attrs, &fields),
                explicit: false,
            });
        }
    }

    for (name, config) in explicit {
        if registry.get(name).is_none() {
            activations.push(Activation {
                plugin: name.clone(),
                config: config.clone(),
                explicit: true,
            });
        }
    }

    activations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::MemoryDirectory;
    use crate::password::SchemeHasher;
    use serde_json::json;

    fn guard() -> CredentialGuard<'static> {
        CredentialGuard::new(&SchemeHasher, "SSHA")
    }

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[test]
    fn test_builtin_fields() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["posix", "ssh", "mail"]);

        let user = registry.extra_fields(&ObjectKind::User);
        assert!(user.allowed.contains(&"uidNumber".to_string()));
        assert!(user.allowed.contains(&"sshPublicKey".to_string()));

        let group = registry.extra_fields(&ObjectKind::Group);
        assert_eq!(group.allowed, vec!["gidNumber".to_string()]);
    }

    #[test]
    fn test_owned_fields_skip_core_attributes() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register_definition(ObjectClassPlugin::new(PluginDefinition {
            name: "contact".to_string(),
            object_class: "extensibleObject".to_string(),
            indicators: vec![],
            user_fields: vec!["mail".to_string(), "pronouns".to_string()],
            group_fields: vec![],
        }));
        let owned = registry.owned_fields(&ObjectKind::User);
        assert!(owned.contains(&"pronouns".to_string()));
        assert!(owned.contains(&"uidNumber".to_string()));
        assert!(!owned.contains(&"mail".to_string()));
    }

    #[test]
    fn test_indicator_detection() {
        let registry = PluginRegistry::with_builtins();
        let row = attrs(&[
            ("uid", "jdoe"),
            ("uidNumber", "1000"),
            ("gecos", "John"),
            ("mailHost", ""),
        ]);
        let activations = resolve_activations(&ObjectKind::User, &row, &BTreeMap::new(), &registry);
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].plugin, "posix");
        assert!(!activations[0].explicit);
        assert_eq!(
            activations[0].config,
            json!({"uidNumber": ["1000"], "gecos": ["John"]})
        );
    }

    #[test]
    fn test_explicit_activation_always_applies() {
        let registry = PluginRegistry::with_builtins();
        let row = attrs(&[("uid", "jdoe"), ("sshPublicKey", "ssh-ed25519 AAAA")]);
        let explicit = BTreeMap::from([
            ("mail".to_string(), json!({"mailHost": "mx1.example.com"})),
            ("vpn".to_string(), json!({})),
        ]);

        let activations = resolve_activations(&ObjectKind::User, &row, &explicit, &registry);
        let names: Vec<&str> = activations.iter().map(|a| a.plugin.as_str()).collect();
        assert_eq!(names, vec!["ssh", "mail", "vpn"]);
        assert!(activations[1].explicit);
        assert_eq!(activations[1].config, json!({"mailHost": "mx1.example.com"}));
    }

    #[test]
    fn test_explicit_config_wins_over_row_values() {
        let registry = PluginRegistry::with_builtins();
        let row = attrs(&[("uidNumber", "1000"), ("loginShell", "/bin/sh")]);
        let explicit = BTreeMap::from([("posix".to_string(), json!({"loginShell": "/bin/zsh"}))]);
        let activations = resolve_activations(&ObjectKind::User, &row, &explicit, &registry);
        assert_eq!(
            activations[0].config,
            json!({"loginShell": "/bin/zsh", "uidNumber": ["1000"]})
        );
    }

    #[test]
    fn test_group_posix_projection() {
        let registry = PluginRegistry::with_builtins();
        let row = attrs(&[("cn", "devs"), ("gidNumber", "500"), ("loginShell", "/bin/sh")]);
        let activations = resolve_activations(&ObjectKind::Group, &row, &BTreeMap::new(), &registry);
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].config, json!({"gidNumber": ["500"]}));
    }

    #[test]
    fn test_payload_attributes() {
        let attrs = payload_attributes(
            "posix",
            &json!({"uidNumber": 1000, "loginShell": "/bin/bash", "x": null, "list": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(attrs["uidNumber"], vec!["1000"]);
        assert_eq!(attrs["list"], vec!["a", "b"]);
        assert!(!attrs.contains_key("x"));

        assert!(payload_attributes("posix", &json!("nope")).is_err());
        assert!(payload_attributes("posix", &json!({"a": {"nested": 1}})).is_err());
    }

    #[tokio::test]
    async fn test_activate_adds_object_class_once() {
        let directory = MemoryDirectory::from_ldif(
            "dn: uid=jdoe,ou=users,dc=test\nobjectClass: inetOrgPerson\nuid: jdoe\n\n",
        );
        let registry = PluginRegistry::with_builtins();
        let activation = Activation {
            plugin: "posix".to_string(),
            config: json!({"uidNumber": ["1000"], "gidNumber": ["100"]}),
            explicit: false,
        };
        let dn = "uid=jdoe,ou=users,dc=test";

        registry.activate(&directory, dn, &activation, &guard()).await.unwrap();
        let entry = directory.get(dn).await.unwrap().unwrap();
        assert_eq!(entry.object_classes(), vec!["inetOrgPerson", "posixAccount"]);
        assert_eq!(entry.first_value("uidNumber"), Some("1000"));

        let again = Activation {
            config: json!({"uidNumber": ["2000"]}),
            ..activation
        };
        registry.activate(&directory, dn, &again, &guard()).await.unwrap();
        let entry = directory.get(dn).await.unwrap().unwrap();
        assert_eq!(entry.first_value("uidNumber"), Some("1000"));
    }

    #[tokio::test]
    async fn test_posix_group_class() {
        let directory = MemoryDirectory::from_ldif(
            "dn: cn=devs,ou=groups,dc=test\nobjectClass: groupOfNames\ncn: devs\n\n",
        );
        let registry = PluginRegistry::with_builtins();
        let activation = Activation {
            plugin: "posix".to_string(),
            config: json!({"gidNumber": ["500"]}),
            explicit: false,
        };
        registry
            .activate(&directory, "cn=devs,ou=groups,dc=test", &activation, &guard())
            .await
            .unwrap();
        let entry = directory.get("cn=devs,ou=groups,dc=test").await.unwrap().unwrap();
        assert!(entry.has_object_class("posixGroup"));
    }

    #[tokio::test]
    async fn test_activate_errors() {
        let directory = MemoryDirectory::new();
        let registry = PluginRegistry::with_builtins();

        let unknown = Activation {
            plugin: "vpn".to_string(),
            config: json!({}),
            explicit: true,
        };
        let err = registry.activate(&directory, "cn=x", &unknown, &guard()).await.unwrap_err();
        assert!(matches!(err, CoreError::PluginError { ref plugin, .. } if plugin == "vpn"));

        let missing = Activation {
            plugin: "ssh".to_string(),
            config: json!({}),
            explicit: false,
        };
        assert!(registry.activate(&directory, "cn=x", &missing, &guard()).await.is_err());
    }

    #[tokio::test]
    async fn test_activate_hashes_password_payload() {
        let directory = MemoryDirectory::from_ldif(
            "dn: uid=jdoe,ou=users,dc=test\nobjectClass: inetOrgPerson\nuid: jdoe\n\n",
        );
        let registry = PluginRegistry::with_builtins();
        let activation = Activation {
            plugin: "posix".to_string(),
            config: json!({"uidNumber": 1000, "userPassword": "plain-secret"}),
            explicit: true,
        };
        let dn = "uid=jdoe,ou=users,dc=test";

        registry.activate(&directory, dn, &activation, &guard()).await.unwrap();
        let entry = directory.get(dn).await.unwrap().unwrap();
        let stored = entry.first_value("userPassword").unwrap();
        assert!(stored.starts_with("{SSHA}"), "{}", stored);
        assert_eq!(activation.config["userPassword"], "plain-secret");
    }

    #[tokio::test]
    async fn test_activate_rejects_unhashable_password() {
        let directory = MemoryDirectory::from_ldif(
            "dn: uid=jdoe,ou=users,dc=test\nobjectClass: inetOrgPerson\nuid: jdoe\n\n",
        );
        let registry = PluginRegistry::with_builtins();
        let activation = Activation {
            plugin: "posix".to_string(),
            config: json!({"userPassword": "x"}),
            explicit: true,
        };
        let broken = CredentialGuard::new(&SchemeHasher, "rot13");
        let err = registry
            .activate(&directory, "uid=jdoe,ou=users,dc=test", &activation, &broken)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PluginError { .. }));

        let entry = directory.get("uid=jdoe,ou=users,dc=test").await.unwrap().unwrap();
        assert!(!entry.has_object_class("posixAccount"));
        assert!(entry.values("userPassword").is_none());
    }
}
