//! Module self-descriptions (the body of `REPLY_UPDATE_INFO`).
//!
//! The JSON is checked against an embedded JSON Schema before it is
//! deserialized, so a malformed description is rejected with a readable
//! message instead of a serde error deep inside a field.

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::store::ModuleRole;

pub type Result<T> = std::result::Result<T, SchemaError>;

/// JSON Schema for a module self-description.
pub const SELF_DESCRIPTION_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "required": ["Name", "Type", "Description", "Commands"],
  "properties": {
    "Name": { "type": "string", "minLength": 1, "maxLength": 64 },
    "Type": { "enum": ["reader", "writer", "Reader", "Writer"] },
    "Description": { "type": "string" },
    "Commands": {
      "type": "array",
      "maxItems": 255,
      "items": {
        "type": "object",
        "required": ["CommandName", "CommandID", "ReturnFormat"],
        "properties": {
          "CommandName": { "type": "string", "minLength": 1 },
          "CommandID": { "type": "integer", "minimum": 0, "maximum": 255 },
          "ReturnFormat": { "type": "string" }
        }
      }
    }
  }
}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type", deserialize_with = "role_any_case")]
    pub role: ModuleRole,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Commands")]
    pub commands: Vec<CommandDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescription {
    #[serde(rename = "CommandName")]
    pub name: String,
    #[serde(rename = "CommandID")]
    pub id: u8,
    #[serde(rename = "ReturnFormat")]
    pub return_format: String,
}

fn role_any_case<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<ModuleRole, D::Error> {
    let text = String::deserialize(d)?;
    match text.to_ascii_lowercase().as_str() {
        "reader" => Ok(ModuleRole::Reader),
        "writer" => Ok(ModuleRole::Writer),
        other => Err(serde::de::Error::unknown_variant(other, &["reader", "writer"])),
    }
}

/// Compiled self-description validator.
pub struct DescriptionValidator {
    validator: Validator,
}

impl std::fmt::Debug for DescriptionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptionValidator").finish_non_exhaustive()
    }
}

impl DescriptionValidator {
    pub fn new() -> Result<Self> {
        let schema: Value = serde_json::from_str(SELF_DESCRIPTION_SCHEMA)?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;
        Ok(Self { validator })
    }

    /// Validate and parse the JSON sent by module `uid`.
    pub fn parse(&self, uid: u16, json: &[u8]) -> Result<SelfDescription> {
        let value: Value = serde_json::from_slice(json)?;

        let problems: Vec<String> = self
            .validator
            .iter_errors(&value)
            .take(4)
            .map(|err| err.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(SchemaError::ValidationFailed {
                uid,
                message: problems.join("; "),
            });
        }

        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "Name": "greenhouse",
        "Type": "reader",
        "Description": "soil moisture",
        "Commands": [
            {"CommandName": "moisture", "CommandID": 1, "ReturnFormat": "i16"},
            {"CommandName": "calibrate", "CommandID": 2, "ReturnFormat": "void"}
        ]
    }"#;

    #[test]
    fn valid_description_parses() {
        let validator = DescriptionValidator::new().unwrap();
        let description = validator.parse(9, VALID.as_bytes()).unwrap();
        assert_eq!(description.name, "greenhouse");
        assert_eq!(description.role, ModuleRole::Reader);
        assert_eq!(description.commands.len(), 2);
        assert_eq!(description.commands[1].id, 2);
    }

    #[test]
    fn role_accepts_capitalized_form() {
        let validator = DescriptionValidator::new().unwrap();
        let json = VALID.replace("\"reader\"", "\"Writer\"");
        let description = validator.parse(9, json.as_bytes()).unwrap();
        assert_eq!(description.role, ModuleRole::Writer);
    }

    #[test]
    fn missing_field_fails_validation() {
        let validator = DescriptionValidator::new().unwrap();
        let err = validator
            .parse(9, br#"{"Name": "x", "Type": "reader", "Commands": []}"#)
            .unwrap_err();
        match err {
            SchemaError::ValidationFailed { uid, message } => {
                assert_eq!(uid, 9);
                assert!(message.contains("Description"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_problem_is_reported() {
        let validator = DescriptionValidator::new().unwrap();
        let json = VALID
            .replace("\"greenhouse\"", "\"\"")
            .replace("\"reader\"", "\"sensor\"");
        match validator.parse(4, json.as_bytes()).unwrap_err() {
            SchemaError::ValidationFailed { message, .. } => {
                assert_eq!(message.matches("; ").count(), 1, "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_command_id_fails_validation() {
        let validator = DescriptionValidator::new().unwrap();
        let json = VALID.replace("\"CommandID\": 2", "\"CommandID\": 300");
        assert!(matches!(
            validator.parse(9, json.as_bytes()),
            Err(SchemaError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid_json() {
        let validator = DescriptionValidator::new().unwrap();
        assert!(matches!(
            validator.parse(9, b"\x01\x02"),
            Err(SchemaError::InvalidJson(_))
        ));
    }
}
