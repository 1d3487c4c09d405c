//! Config schema validation
//!
//! A schema lists the keys a prompt's config block may carry. Violations are
//! reported as plain messages; the metadata scanner turns them into
//! `invalid-config` errors.

use super::parser::ConfigError;
use parley_core::Config;
use serde::{Deserialize, Serialize};

// ============================================================================
// SCHEMA TYPES
// ============================================================================

/// Expected JSON kind of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }

    fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value as J;
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|n| n.fract() == 0.0).unwrap_or(false)
            }
            FieldKind::Boolean => matches!(value, J::Bool(_)),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

fn default_kind() -> FieldKind {
    FieldKind::Any
}

/// Declarative description of a valid config block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(default)]
    pub fields: Vec<ConfigField>,
    /// Whether keys not listed in `fields` are accepted.
    #[serde(default = "default_allow_unknown")]
    pub allow_unknown: bool,
}

fn default_allow_unknown() -> bool {
    true
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            allow_unknown: true,
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

impl ConfigSchema {
    /// Load a schema from YAML (JSON is valid YAML too).
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse(e.to_string()))
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind, required: bool) -> Self {
        self.fields.push(ConfigField {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    pub fn deny_unknown(mut self) -> Self {
        self.allow_unknown = false;
        self
    }

    /// Check a config block, returning one message per violation.
    pub fn validate(&self, config: &Config) -> Vec<String> {
        let mut violations = Vec::new();

        for field in &self.fields {
            match config.get(&field.name) {
                None if field.required => {
                    violations.push(format!("Missing required config key '{}'", field.name))
                }
                None => {}
                Some(value) if !field.kind.accepts(value) => violations.push(format!(
                    "Config key '{}' must be of type {}",
                    field.name,
                    field.kind.as_str()
                )),
                Some(_) => {}
            }
        }

        if !self.allow_unknown {
            for key in config.keys() {
                if !self.fields.iter().any(|f| &f.name == key) {
                    violations.push(format!("Unknown config key '{}'", key));
                }
            }
        }

        violations
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config_block;

    #[test]
    fn test_schema_from_yaml() -> Result<(), ConfigError> {
        let schema = ConfigSchema::from_yaml(
            "fields:\n  - name: model\n    kind: string\n    required: true\n  - name: temperature\n    kind: number\nallow_unknown: false\n",
        )?;
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].kind, FieldKind::String);
        assert!(!schema.allow_unknown);
        Ok(())
    }

    #[test]
    fn test_valid_config_passes() -> Result<(), ConfigError> {
        let schema = ConfigSchema::default()
            .field("model", FieldKind::String, true)
            .field("max_tokens", FieldKind::Integer, false);
        let config = parse_config_block("model: gpt-4o\nmax_tokens: 200\nextra: yes\n")?;
        assert!(schema.validate(&config).is_empty());
        Ok(())
    }

    #[test]
    fn test_violations_are_reported() -> Result<(), ConfigError> {
        let schema = ConfigSchema::default()
            .field("model", FieldKind::String, true)
            .field("temperature", FieldKind::Number, false)
            .deny_unknown();
        let config = parse_config_block("temperature: hot\nfoo: 1\n")?;
        let violations = schema.validate(&config);
        assert_eq!(violations.len(), 3);
        assert!(violations[0].contains("model"));
        assert!(violations[1].contains("temperature"));
        assert!(violations[2].contains("foo"));
        Ok(())
    }
}
