//! Predicates evaluated locally against rows returned by the remote API.

use std::collections::BTreeSet;

use serde_json::Value;
use unirest_core::ValueType;

/// Membership test of one property against a set of normalized literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPredicate {
    /// Public property name, without a field underscore.
    pub property: String,
    pub value_type: ValueType,
    pub values: BTreeSet<String>,
}

impl ClientPredicate {
    /// Whether a returned row satisfies this predicate.
    ///
    /// Rows that are not objects, lack the property, or carry a value that
    /// does not fit the property's type never match.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(object) = row.as_object() else {
            return false;
        };

        let field = format!("_{}", self.property);
        let value = object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.property))
            .or_else(|| object.iter().find(|(k, _)| k.eq_ignore_ascii_case(&field)))
            .map(|(_, v)| v);

        value
            .and_then(|v| self.value_type.normalize_json(v))
            .is_some_and(|v| self.values.contains(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn amounts(values: &[&str]) -> ClientPredicate {
        ClientPredicate {
            property: "Amount".to_string(),
            value_type: ValueType::Decimal,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn matches_normalized_numbers() {
        let p = amounts(&["100", "200.5"]);
        assert!(p.matches(&json!({"Amount": 100.0})));
        assert!(p.matches(&json!({"amount": 200.5})));
        assert!(!p.matches(&json!({"Amount": 300})));
    }

    #[test]
    fn falls_back_to_backing_field() {
        let p = amounts(&["100"]);
        assert!(p.matches(&json!({"_Amount": 100})));
    }

    #[test]
    fn missing_or_null_never_matches() {
        let p = amounts(&["100"]);
        assert!(!p.matches(&json!({"Other": 100})));
        assert!(!p.matches(&json!({"Amount": null})));
        assert!(!p.matches(&json!([100])));
    }
}
