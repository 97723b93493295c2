//! Comparison operators shared by effect filters and search filters.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    In,
    NotIn,
}

impl ComparisonOperator {
    /// Apply the operator to a field value. A missing or null field never matches.
    pub fn evaluate(&self, field: Option<&Value>, operand: &Value) -> bool {
        let Some(field) = field.filter(|f| !f.is_null()) else {
            return false;
        };
        match self {
            ComparisonOperator::Equal => values_equal(field, operand),
            ComparisonOperator::NotEqual => !values_equal(field, operand),
            ComparisonOperator::GreaterThan => field.compare(operand) == Some(Ordering::Greater),
            ComparisonOperator::GreaterEqual => matches!(
                field.compare(operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ComparisonOperator::LessThan => field.compare(operand) == Some(Ordering::Less),
            ComparisonOperator::LessEqual => matches!(
                field.compare(operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ComparisonOperator::In => contained_in(field, operand),
            ComparisonOperator::NotIn => !contained_in(field, operand),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.compare(b) == Some(Ordering::Equal)
}

fn contained_in(field: &Value, operand: &Value) -> bool {
    let Some(allowed) = operand.as_string_list() else {
        return false;
    };
    match field.as_string_list() {
        Some(values) => values.iter().any(|v| allowed.contains(v)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_never_matches() {
        for op in [
            ComparisonOperator::Equal,
            ComparisonOperator::NotEqual,
            ComparisonOperator::In,
            ComparisonOperator::NotIn,
        ] {
            assert!(!op.evaluate(None, &Value::from("x")));
            assert!(!op.evaluate(Some(&Value::Null), &Value::from("x")));
        }
    }

    #[test]
    fn test_equality_numeric() {
        assert!(ComparisonOperator::Equal.evaluate(Some(&Value::Int(1)), &Value::Float(1.0)));
        assert!(ComparisonOperator::NotEqual.evaluate(Some(&Value::Int(1)), &Value::Int(2)));
    }

    #[test]
    fn test_ordering() {
        let five = Value::Int(5);
        assert!(ComparisonOperator::GreaterThan.evaluate(Some(&five), &Value::Int(3)));
        assert!(ComparisonOperator::LessEqual.evaluate(Some(&five), &Value::Float(5.0)));
        assert!(!ComparisonOperator::LessThan.evaluate(Some(&five), &Value::from("a")));
    }

    #[test]
    fn test_in() {
        let allowed = Value::StringList(vec!["like".into(), "share".into()]);
        assert!(ComparisonOperator::In.evaluate(Some(&Value::from("like")), &allowed));
        assert!(ComparisonOperator::NotIn.evaluate(Some(&Value::from("view")), &allowed));
    }
}
