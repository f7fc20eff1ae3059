use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::AttributeMap;
use crate::error::CoreError;

/// Import template: attribute defaults plus plugin activations.
///
/// Placeholders are expected to be resolved before the template reaches the importer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default, deserialize_with = "deserialize_defaults")]
    pub defaults: AttributeMap,
    #[serde(default)]
    pub plugin_activations: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefaultValue {
    One(String),
    Many(Vec<String>),
}

fn deserialize_defaults<'de, D>(deserializer: D) -> Result<AttributeMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, DefaultValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(attr, value)| match value {
            DefaultValue::One(v) => (attr, vec![v]),
            DefaultValue::Many(vs) => (attr, vs),
        })
        .collect())
}

impl Template {
    /// Load a template file. `.json` files are JSON, anything else TOML.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!("Failed to read template {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content)
            .map_err(|e| CoreError::ConfigError(format!("Invalid template: {}", e)))
    }

    pub fn from_json(content: &str) -> Result<Self, CoreError> {
        serde_json::from_str(content)
            .map_err(|e| CoreError::ConfigError(format!("Invalid template: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_toml_template() {
        let template = Template::from_toml(
            r#"
[defaults]
o = "Example Corp"
businessCategory = ["staff", "remote"]

[plugin_activations.posix]
loginShell = "/bin/bash"
gidNumber = 100
"#,
        )
        .unwrap();
        assert_eq!(template.defaults["o"], vec!["Example Corp"]);
        assert_eq!(template.defaults["businessCategory"], vec!["staff", "remote"]);
        assert_eq!(
            template.plugin_activations["posix"],
            json!({"loginShell": "/bin/bash", "gidNumber": 100})
        );
    }

    #[test]
    fn test_json_template() {
        let template =
            Template::from_json(r#"{"defaults": {"l": "Berlin"}, "plugin_activations": {"ssh": {}}}"#)
                .unwrap();
        assert_eq!(template.defaults["l"], vec!["Berlin"]);
        assert!(template.plugin_activations.contains_key("ssh"));
    }

    #[test]
    fn test_empty_and_invalid() {
        assert_eq!(Template::from_toml("").unwrap(), Template::default());
        assert!(Template::from_json("{\"defaults\": {\"l\": 5}}").is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let json_path = tmp.path().join("t.JSON");
        std::fs::write(&json_path, r#"{"defaults": {"ou": "eng"}}"#).unwrap();
        assert_eq!(Template::load(&json_path).unwrap().defaults["ou"], vec!["eng"]);

        let toml_path = tmp.path().join("t.toml");
        std::fs::write(&toml_path, "[defaults]\nou = \"ops\"\n").unwrap();
        assert_eq!(Template::load(&toml_path).unwrap().defaults["ou"], vec!["ops"]);
    }
}
