//! Skip and success conditions for steps
//!
//! Conditions compare a named variable against a literal. A list of
//! conditions is evaluated as a conjunction; its polarity comes from the
//! type of its first entry.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::errors::PipelineError;
use super::variables::{Format, Variable};

/// Kind of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionType {
    /// Skip the step when the conditions hold
    Skip,
    /// Run the step only when the conditions hold
    Trigger,
    /// Step succeeds only when the conditions hold
    Pass,
    /// Step fails when the conditions hold
    Fail,
}

impl ConditionType {
    /// True for kinds whose satisfied conditions mean "go ahead"
    fn is_positive(self) -> bool {
        matches!(self, Self::Trigger | Self::Pass)
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Equal
    #[serde(rename = "==")]
    Eq,
    /// Not equal
    #[serde(rename = "!=")]
    Ne,
    /// Less than
    #[serde(rename = "<")]
    Lt,
    /// Greater than
    #[serde(rename = ">")]
    Gt,
    /// Less than or equal
    #[serde(rename = "<=")]
    Le,
    /// Greater than or equal
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::Le => ordering != Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// A single comparison against a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Kind of the condition
    pub condition_type: ConditionType,
    /// Variable the condition reads
    pub condition_on_variable: String,
    /// Comparison operator
    pub condition_operator: Operator,
    /// Literal compared against
    pub conditional_value: String,
}

impl Condition {
    /// Creates a condition
    pub fn new(
        condition_type: ConditionType,
        variable: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            condition_on_variable: variable.into(),
            condition_operator: operator,
            conditional_value: value.into(),
        }
    }

    /// Evaluates this comparison against the given variables
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Condition`] if the variable is unknown or a
    /// numeric comparison is requested on a non-numeric value.
    pub fn holds(&self, variables: &[Variable]) -> Result<bool, PipelineError> {
        let variable = variables
            .iter()
            .find(|v| v.name == self.condition_on_variable)
            .ok_or_else(|| {
                PipelineError::Condition(format!(
                    "variable '{}' not found",
                    self.condition_on_variable
                ))
            })?;

        let ordering = if variable.format == Format::Number {
            let left = parse_number(&variable.value, &variable.name)?;
            let right = parse_number(&self.conditional_value, &variable.name)?;
            left.partial_cmp(&right).ok_or_else(|| {
                PipelineError::Condition(format!("cannot compare '{}'", variable.name))
            })?
        } else {
            variable.value.as_str().cmp(self.conditional_value.as_str())
        };

        Ok(self.condition_operator.accepts(ordering))
    }
}

fn parse_number(raw: &str, variable: &str) -> Result<f64, PipelineError> {
    raw.trim().parse::<f64>().map_err(|_| {
        PipelineError::Condition(format!("'{raw}' is not a number (variable '{variable}')"))
    })
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.condition_on_variable, self.condition_operator, self.conditional_value
        )
    }
}

/// Default condition collaborator
///
/// ANDs every condition in the list. The result is returned as-is for
/// TRIGGER and PASS lists and negated for SKIP and FAIL lists, so `true`
/// always means "run the step" or "the step succeeded".
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Evaluates a condition list
    ///
    /// # Errors
    ///
    /// Propagates the first comparison error.
    pub fn evaluate_all(
        conditions: &[Condition],
        variables: &[Variable],
    ) -> Result<bool, PipelineError> {
        let Some(first) = conditions.first() else {
            return Ok(true);
        };
        let mut all_hold = true;
        for condition in conditions {
            all_hold &= condition.holds(variables)?;
        }
        Ok(if first.condition_type.is_positive() {
            all_hold
        } else {
            !all_hold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<Variable> {
        vec![
            Variable::literal("ENV", "prod"),
            Variable::literal("COVERAGE", "81.5").with_format(Format::Number),
        ]
    }

    #[test]
    fn test_skip_condition_negates() {
        let skip = vec![Condition::new(ConditionType::Skip, "ENV", Operator::Eq, "prod")];
        assert!(!ExpressionEvaluator::evaluate_all(&skip, &vars()).unwrap());
    }

    #[test]
    fn test_trigger_condition_passes_through() {
        let trigger = vec![Condition::new(
            ConditionType::Trigger,
            "ENV",
            Operator::Eq,
            "prod",
        )];
        assert!(ExpressionEvaluator::evaluate_all(&trigger, &vars()).unwrap());
    }

    #[test]
    fn test_numeric_comparison() {
        let pass = vec![Condition::new(
            ConditionType::Pass,
            "COVERAGE",
            Operator::Ge,
            "80",
        )];
        assert!(ExpressionEvaluator::evaluate_all(&pass, &vars()).unwrap());

        let fail = vec![Condition::new(
            ConditionType::Fail,
            "COVERAGE",
            Operator::Lt,
            "90",
        )];
        assert!(!ExpressionEvaluator::evaluate_all(&fail, &vars()).unwrap());
    }

    #[test]
    fn test_conjunction() {
        let pass = vec![
            Condition::new(ConditionType::Pass, "ENV", Operator::Eq, "prod"),
            Condition::new(ConditionType::Pass, "COVERAGE", Operator::Gt, "95"),
        ];
        assert!(!ExpressionEvaluator::evaluate_all(&pass, &vars()).unwrap());
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let skip = vec![Condition::new(ConditionType::Skip, "NOPE", Operator::Eq, "x")];
        assert!(ExpressionEvaluator::evaluate_all(&skip, &vars()).is_err());
    }

    #[test]
    fn test_deserialize_condition() {
        let json = r#"{
            "conditionType": "TRIGGER",
            "conditionOnVariable": "ENV",
            "conditionOperator": "!=",
            "conditionalValue": "dev"
        }"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(condition.condition_operator, Operator::Ne);
        assert_eq!(condition.to_string(), "ENV != dev");
    }
}
