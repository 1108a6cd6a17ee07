//! YAML mapping configuration.
//!
//! The config supplies the mappings the generator cannot infer: external
//! type substitutions, enum mappings, and polymorphic-type-to-oneof
//! mappings. Malformed YAML or an unknown strategy aborts generation.

use crate::error::{GenError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Types bridged through caller-supplied conversion functions.
    #[serde(default)]
    pub external_types: Vec<ExternalType>,
    /// Plain (unit-variant) enums and their proto counterparts.
    #[serde(default)]
    pub enums: Vec<EnumMapping>,
    /// Closed polymorphic types mapped to tagged wire unions.
    #[serde(default)]
    pub interfaces: Vec<InterfaceMapping>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalType {
    pub rust_type: String,
    pub proto_type: String,
    /// Path of a `fn(T) -> proto::P` conversion.
    pub to_proto: String,
    /// Path of a `fn(proto::P) -> Result<T, Error>` conversion.
    pub from_proto: String,
    /// Optional `use` line emitted into the generated shim.
    #[serde(default)]
    pub import: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumMapping {
    pub rust_type: String,
    pub proto_type: String,
    /// Variant names, in wire-tag order. Append-only.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceMapping {
    /// The closed enum standing in for the polymorphic interface.
    pub rust_type: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Name of the generated container message holding the oneof.
    pub proto_container: String,
    /// One case per enum variant, in wire-tag order.
    pub cases: Vec<OneofCase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneofCase {
    /// The struct type carried by the corresponding variant.
    pub rust_type: String,
}

fn default_strategy() -> String {
    "oneof".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|err| GenError::Io {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|err| GenError::Config {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        config.validate(&display)?;
        Ok(config)
    }

    fn validate(&self, path: &str) -> Result<()> {
        for mapping in &self.interfaces {
            if mapping.strategy != "oneof" {
                return Err(GenError::Config {
                    path: path.to_string(),
                    reason: format!(
                        "interface {}: unknown strategy {:?} (only \"oneof\" is supported)",
                        mapping.rust_type, mapping.strategy
                    ),
                });
            }
            if mapping.cases.is_empty() {
                return Err(GenError::Config {
                    path: path.to_string(),
                    reason: format!("interface {}: no cases listed", mapping.rust_type),
                });
            }
        }
        for mapping in &self.enums {
            if mapping.values.is_empty() {
                return Err(GenError::Config {
                    path: path.to_string(),
                    reason: format!("enum {}: no values listed", mapping.rust_type),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(yaml: &str) -> Result<Config> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        Config::load(file.path())
    }

    #[test]
    fn full_config_parses() {
        let config = load_str(
            r#"
external_types:
  - rust_type: BigInt
    proto_type: BigInt
    to_proto: big_int_to_proto
    from_proto: big_int_from_proto
    import: "crate::num"
enums:
  - rust_type: Quality
    proto_type: Quality
    values: [Good, Bad]
interfaces:
  - rust_type: PriceSource
    strategy: oneof
    proto_container: PriceSource
    cases:
      - rust_type: StaticSource
      - rust_type: FeedSource
"#,
        )
        .unwrap();
        assert_eq!(config.external_types.len(), 1);
        assert_eq!(config.enums[0].values, vec!["Good", "Bad"]);
        assert_eq!(config.interfaces[0].cases.len(), 2);
        assert_eq!(config.interfaces[0].strategy, "oneof");
    }

    #[test]
    fn strategy_defaults_to_oneof() {
        let config = load_str(
            r#"
interfaces:
  - rust_type: PriceSource
    proto_container: PriceSource
    cases:
      - rust_type: StaticSource
"#,
        )
        .unwrap();
        assert_eq!(config.interfaces[0].strategy, "oneof");
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = load_str(
            r#"
interfaces:
  - rust_type: PriceSource
    strategy: flatten
    proto_container: PriceSource
    cases:
      - rust_type: StaticSource
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown strategy"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = load_str("interfaces: [not a mapping").unwrap_err();
        assert!(matches!(err, GenError::Config { .. }));
    }
}
