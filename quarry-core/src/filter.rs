//! Filter constraints for query descriptors
//!
//! A filter map associates a field name with either a plain value (equality)
//! or an operator expression. Maps are kept sorted by field name so two
//! descriptors with the same filters always serialize identically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (for strings)
    Contains,
    /// In list of values
    In,
    /// Not in list of values
    NotIn,
    /// SQL LIKE pattern
    Like,
    /// IS NULL / IS NOT NULL (value is a bool)
    IsNull,
}

/// Constraint applied to a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Field must equal the value.
    Equals(Value),
    /// Field must satisfy the operator against the value.
    Expr {
        operator: FilterOperator,
        value: Value,
    },
}

impl Constraint {
    /// Create an operator expression.
    pub fn op(operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self::Expr {
            operator,
            value: value.into(),
        }
    }

    /// Create an IN constraint.
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::op(
            FilterOperator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// The operator this constraint applies (`Eq` for plain values).
    pub fn operator(&self) -> FilterOperator {
        match self {
            Self::Equals(_) => FilterOperator::Eq,
            Self::Expr { operator, .. } => *operator,
        }
    }

    /// The comparison value.
    pub fn value(&self) -> &Value {
        match self {
            Self::Equals(value) | Self::Expr { value, .. } => value,
        }
    }
}

impl From<Value> for Constraint {
    fn from(value: Value) -> Self {
        Self::Equals(value)
    }
}

impl From<&str> for Constraint {
    fn from(value: &str) -> Self {
        Self::Equals(Value::from(value))
    }
}

impl From<String> for Constraint {
    fn from(value: String) -> Self {
        Self::Equals(Value::from(value))
    }
}

impl From<i64> for Constraint {
    fn from(value: i64) -> Self {
        Self::Equals(Value::from(value))
    }
}

impl From<bool> for Constraint {
    fn from(value: bool) -> Self {
        Self::Equals(Value::from(value))
    }
}

/// Field name to constraint, sorted by field name.
pub type FilterMap = BTreeMap<String, Constraint>;

/// Shallow-merge `incoming` into `target`; later keys overwrite earlier ones.
pub fn merge_filters<I, K, C>(target: &mut FilterMap, incoming: I)
where
    I: IntoIterator<Item = (K, C)>,
    K: Into<String>,
    C: Into<Constraint>,
{
    for (field, constraint) in incoming {
        target.insert(field.into(), constraint.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_is_last_write_wins() {
        let mut filters = FilterMap::new();
        merge_filters(&mut filters, [("status", "active"), ("role", "admin")]);
        merge_filters(&mut filters, [("status", "banned")]);

        assert_eq!(filters.len(), 2);
        assert_eq!(filters["status"], Constraint::from("banned"));
        assert_eq!(filters["role"], Constraint::from("admin"));
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut filters = FilterMap::new();
        merge_filters(&mut filters, [("meta", json!({"a": 1, "b": 2}))]);
        merge_filters(&mut filters, [("meta", json!({"c": 3}))]);

        assert_eq!(filters["meta"], Constraint::Equals(json!({"c": 3})));
    }

    #[test]
    fn test_constraint_accessors() {
        let eq = Constraint::from(5i64);
        assert_eq!(eq.operator(), FilterOperator::Eq);
        assert_eq!(eq.value(), &json!(5));

        let any = Constraint::one_of(["a", "b"]);
        assert_eq!(any.operator(), FilterOperator::In);
        assert_eq!(any.value(), &json!(["a", "b"]));
    }

    #[test]
    fn test_filter_map_serializes_sorted() {
        let mut a = FilterMap::new();
        merge_filters(&mut a, [("z", 1i64), ("a", 2i64)]);
        let mut b = FilterMap::new();
        merge_filters(&mut b, [("a", 2i64), ("z", 1i64)]);

        let a_json = serde_json::to_string(&a).expect("serialize");
        let b_json = serde_json::to_string(&b).expect("serialize");
        assert_eq!(a_json, b_json);
        assert!(a_json.find("\"a\"") < a_json.find("\"z\""));
    }
}
