//! Typed variables flowing between steps
//!
//! A [`Variable`] carries its declared [`Format`], the raw string value and,
//! once checked, the value coerced to that format. Where the value comes
//! from is described by a [`VariableSource`].

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::{PipelineError, ValidationError};

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name pattern"));

/// True when `name` can be used as a shell variable name
pub fn is_env_name(name: &str) -> bool {
    ENV_NAME.is_match(name)
}

/// Declared scalar type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    /// Free-form text
    #[default]
    String,
    /// Floating point number
    Number,
    /// Boolean flag
    Bool,
    /// RFC 3339 timestamp
    Date,
}

impl Format {
    /// Coerces a raw string to this format
    ///
    /// Returns `None` when the raw value is not acceptable for the format.
    pub fn coerce(self, raw: &str) -> Option<TypedValue> {
        match self {
            Self::String => Some(TypedValue::String(raw.to_string())),
            Self::Number => raw.trim().parse::<f64>().ok().map(TypedValue::Number),
            Self::Bool => parse_bool(raw.trim()).map(TypedValue::Bool),
            Self::Date => DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|d| TypedValue::Date(d.with_timezone(&Utc))),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "STRING" => Ok(Self::String),
            "NUMBER" => Ok(Self::Number),
            "BOOL" | "BOOLEAN" => Ok(Self::Bool),
            "DATE" => Ok(Self::Date),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "STRING"),
            Self::Number => write!(f, "NUMBER"),
            Self::Bool => write!(f, "BOOL"),
            Self::Date => write!(f, "DATE"),
        }
    }
}

/// A value coerced to its declared format
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Text value
    String(String),
    /// Numeric value
    Number(f64),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Date(DateTime<Utc>),
}

/// Address of an output produced by an earlier step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepRef {
    /// Index of the producing step within its stage
    pub step_index: usize,
    /// Name of the produced output variable
    pub name: String,
}

/// Where a variable's value is drawn from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSource {
    /// Value embedded in the definition
    Literal,
    /// Entry of the global environment map
    Global {
        /// Key in the global environment
        name: String,
    },
    /// Output of a pre-CI step
    PreCi(StepRef),
    /// Output of a post-CI step
    PostCi(StepRef),
    /// Output of a sub-step of the enclosing referenced plugin
    Plugin(StepRef),
}

impl VariableSource {
    /// Returns true for literal values
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal)
    }
}

/// A named, typed value flowing between steps
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawVariable")]
pub struct Variable {
    /// Variable name, exported to the step environment as-is
    pub name: String,
    /// Scope the value is resolved from
    pub source: VariableSource,
    /// Declared format
    pub format: Format,
    /// Raw string value
    pub value: String,
    /// Value coerced to `format`, absent until checked or when empty
    pub typed_value: Option<TypedValue>,
    /// Sub-step index this variable maps to when the owning step is a
    /// referenced plugin
    pub plugin_step_index: usize,
}

impl Variable {
    fn new(name: impl Into<String>, source: VariableSource) -> Self {
        Self {
            name: name.into(),
            source,
            format: Format::String,
            value: String::new(),
            typed_value: None,
            plugin_step_index: 0,
        }
    }

    /// Literal variable with an embedded value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut var = Self::new(name, VariableSource::Literal);
        var.value = value.into();
        var
    }

    /// Output declaration, valueless until the step runs
    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, VariableSource::Literal)
    }

    /// Variable resolved from the global environment
    pub fn global(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableSource::Global {
                name: reference.into(),
            },
        )
    }

    /// Variable resolved from a pre-CI step output
    pub fn pre_ci(name: impl Into<String>, step_index: usize, reference: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableSource::PreCi(StepRef {
                step_index,
                name: reference.into(),
            }),
        )
    }

    /// Variable resolved from a post-CI step output
    pub fn post_ci(name: impl Into<String>, step_index: usize, reference: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableSource::PostCi(StepRef {
                step_index,
                name: reference.into(),
            }),
        )
    }

    /// Variable resolved from a sibling plugin sub-step output
    pub fn plugin(name: impl Into<String>, step_index: usize, reference: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableSource::Plugin(StepRef {
                step_index,
                name: reference.into(),
            }),
        )
    }

    /// Sets the declared format
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Maps this variable onto a sub-step of a referenced plugin
    pub fn in_plugin_step(mut self, index: usize) -> Self {
        self.plugin_step_index = index;
        self
    }

    /// Coerces `value` to the declared format
    ///
    /// Empty values carry no typed value and are never rejected.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TypeMismatch`] if the value cannot be coerced.
    pub fn type_check(&mut self) -> Result<(), PipelineError> {
        if self.value.is_empty() {
            self.typed_value = None;
            return Ok(());
        }
        match self.format.coerce(&self.value) {
            Some(typed) => {
                self.typed_value = Some(typed);
                Ok(())
            }
            None => Err(PipelineError::TypeMismatch {
                variable: self.name.clone(),
                format: self.format.to_string(),
                value: self.value.clone(),
            }),
        }
    }
}

/// Wire form of a variable
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariable {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    variable_type: String,
    #[serde(default)]
    reference_variable_name: String,
    #[serde(default)]
    reference_variable_step_index: usize,
    #[serde(default)]
    variable_step_index_in_plugin: usize,
}

impl TryFrom<RawVariable> for Variable {
    type Error = ValidationError;

    fn try_from(raw: RawVariable) -> Result<Self, Self::Error> {
        let step_ref = || StepRef {
            step_index: raw.reference_variable_step_index,
            name: raw.reference_variable_name.clone(),
        };
        let source = match raw.variable_type.as_str() {
            "" | "VALUE" => VariableSource::Literal,
            "REF_GLOBAL" => VariableSource::Global {
                name: raw.reference_variable_name.clone(),
            },
            "REF_PRE_CI" => VariableSource::PreCi(step_ref()),
            "REF_POST_CI" => VariableSource::PostCi(step_ref()),
            "REF_PLUGIN" => VariableSource::Plugin(step_ref()),
            other => {
                return Err(ValidationError::UnknownVariableType {
                    variable: raw.name,
                    value: other.to_string(),
                });
            }
        };
        let format = raw
            .format
            .parse::<Format>()
            .map_err(|value| ValidationError::UnknownFormat {
                variable: raw.name.clone(),
                value,
            })?;

        Ok(Self {
            name: raw.name,
            source,
            format,
            value: raw.value,
            typed_value: None,
            plugin_step_index: raw.variable_step_index_in_plugin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_env_name() {
        assert!(is_env_name("IMAGE_TAG"));
        assert!(is_env_name("_x1"));
        assert!(!is_env_name("1ST"));
        assert!(!is_env_name("A-B"));
        assert!(!is_env_name("A}; rm"));
        assert!(!is_env_name(""));
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(Format::Number.coerce("42"), Some(TypedValue::Number(42.0)));
        assert_eq!(Format::Number.coerce(" 1.5 "), Some(TypedValue::Number(1.5)));
        assert_eq!(Format::Number.coerce("abc"), None);
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(Format::Bool.coerce("True"), Some(TypedValue::Bool(true)));
        assert_eq!(Format::Bool.coerce("0"), Some(TypedValue::Bool(false)));
        assert_eq!(Format::Bool.coerce("yes"), None);
    }

    #[test]
    fn test_date_coercion() {
        assert!(Format::Date.coerce("2024-05-01T10:00:00Z").is_some());
        assert!(Format::Date.coerce("yesterday").is_none());
    }

    #[test]
    fn test_type_check_rejects_non_numeric() {
        let mut var = Variable::literal("COUNT", "many").with_format(Format::Number);
        let err = var.type_check().unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_type_check_skips_empty_value() {
        let mut var = Variable::global("PORT", "MISSING").with_format(Format::Number);
        assert!(var.type_check().is_ok());
        assert!(var.typed_value.is_none());
    }

    #[test]
    fn test_deserialize_reference_variable() {
        let json = r#"{
            "name": "IMAGE",
            "format": "STRING",
            "variableType": "REF_PRE_CI",
            "referenceVariableName": "BUILT_IMAGE",
            "referenceVariableStepIndex": 2
        }"#;
        let var: Variable = serde_json::from_str(json).unwrap();
        assert_eq!(
            var.source,
            VariableSource::PreCi(StepRef {
                step_index: 2,
                name: "BUILT_IMAGE".to_string()
            })
        );
    }

    #[test]
    fn test_deserialize_defaults_to_literal() {
        let var: Variable = serde_json::from_str(r#"{"name": "TAG", "value": "v1"}"#).unwrap();
        assert!(var.source.is_literal());
        assert_eq!(var.format, Format::String);
        assert_eq!(var.value, "v1");
    }

    #[test]
    fn test_deserialize_rejects_unknown_type() {
        let result: Result<Variable, _> =
            serde_json::from_str(r#"{"name": "X", "variableType": "REF_SOMEWHERE"}"#);
        assert!(result.is_err());
    }
}
