//! Config block parser
//! Uses serde_yaml for ALL parsing; the result is kept as plain JSON so it
//! can be copied verbatim into the compiled conversation.

use parley_core::Config;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    YamlParse(String),
    NotAMapping(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::YamlParse(msg) => write!(f, "YAML parse error: {}", msg),
            ConfigError::NotAMapping(kind) => {
                write!(f, "Config block must be a mapping, found {}", kind)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// PARSER FUNCTIONS
// ============================================================================

/// Parse the YAML between the `---` fences of a config block.
///
/// An empty block yields an empty mapping.
pub fn parse_config_block(content: &str) -> Result<Config, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Config::new());
    }

    let value: serde_json::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse(e.to_string()))?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Config::new()),
        serde_json::Value::Array(_) => Err(ConfigError::NotAMapping("a sequence".to_string())),
        other => Err(ConfigError::NotAMapping(format!("scalar {}", other))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mapping() -> Result<(), ConfigError> {
        let config = parse_config_block("model: gpt-4o\ntemperature: 0.2\nstop: [a, b]\n")?;
        assert_eq!(config["model"], json!("gpt-4o"));
        assert_eq!(config["temperature"], json!(0.2));
        assert_eq!(config["stop"], json!(["a", "b"]));
        Ok(())
    }

    #[test]
    fn test_empty_block_is_empty_mapping() -> Result<(), ConfigError> {
        assert!(parse_config_block("")?.is_empty());
        assert!(parse_config_block("  \n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(matches!(
            parse_config_block("- a\n- b\n"),
            Err(ConfigError::NotAMapping(_))
        ));
        assert!(matches!(
            parse_config_block("just text"),
            Err(ConfigError::NotAMapping(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(matches!(
            parse_config_block("foo: [unclosed\n"),
            Err(ConfigError::YamlParse(_))
        ));
    }
}
