//! Query predicates sent to the remote API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of an entity property, as far as filtering is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Enum,
}

impl ValueType {
    /// Parse a value type from its configuration name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Some(Self::String),
            "integer" | "int" | "long" => Some(Self::Integer),
            "decimal" | "double" | "number" => Some(Self::Decimal),
            "boolean" | "bool" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::DateTime),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }

    /// Whether literals of this type are embedded unquoted in a WHERE expression.
    pub fn is_bare_literal(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal | Self::Boolean)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// Whether a filter key addressed a public property or an internal field.
///
/// Internal fields are addressed with a leading underscore (`_Account`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Property,
    Field,
}

/// A structured match of one property against one or more literal values.
///
/// More than one value forms an OR-group. The value list is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMatch {
    pub property: String,
    pub kind: FieldKind,
    pub value_type: ValueType,
    values: Vec<String>,
}

impl PropertyMatch {
    pub fn new(
        property: impl Into<String>,
        kind: FieldKind,
        value_type: ValueType,
        first: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            kind,
            value_type,
            values: vec![first.into()],
        }
    }

    /// Build a match from a value list, returning `None` when it is empty.
    pub fn from_values(
        property: impl Into<String>,
        kind: FieldKind,
        value_type: ValueType,
        values: Vec<String>,
    ) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            property: property.into(),
            kind,
            value_type,
            values,
        })
    }

    /// Add another alternative to the OR-group.
    pub fn or(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_disjunction(&self) -> bool {
        self.values.len() > 1
    }
}

/// One server-side predicate: a structured match or a raw WHERE expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterPredicate {
    Match(PropertyMatch),
    RawWhere { expression: String },
}

impl FilterPredicate {
    pub fn raw_where(expression: impl Into<String>) -> Self {
        Self::RawWhere {
            expression: expression.into(),
        }
    }

    pub fn is_raw_sql(&self) -> bool {
        matches!(self, Self::RawWhere { .. })
    }

    pub fn as_match(&self) -> Option<&PropertyMatch> {
        match self {
            Self::Match(m) => Some(m),
            Self::RawWhere { .. } => None,
        }
    }
}

impl From<PropertyMatch> for FilterPredicate {
    fn from(value: PropertyMatch) -> Self {
        Self::Match(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_value_list_is_rejected() {
        assert!(
            PropertyMatch::from_values("Amount", FieldKind::Property, ValueType::Decimal, vec![])
                .is_none()
        );
    }

    #[test]
    fn or_group_grows() {
        let m = PropertyMatch::new("Amount", FieldKind::Property, ValueType::Decimal, "100")
            .or("200");
        assert!(m.is_disjunction());
        assert_eq!(m.values(), ["100", "200"]);
    }

    #[test]
    fn wire_shape() {
        let p: FilterPredicate =
            PropertyMatch::new("Account", FieldKind::Property, ValueType::String, "1000").into();
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            json!({
                "type": "match",
                "property": "Account",
                "kind": "property",
                "value_type": "string",
                "values": ["1000"]
            })
        );
        let raw = FilterPredicate::raw_where("Account = '1000'");
        assert!(raw.is_raw_sql());
        assert_eq!(
            serde_json::to_value(&raw).unwrap(),
            json!({"type": "rawWhere", "expression": "Account = '1000'"})
        );
    }

    #[test]
    fn value_type_names() {
        assert_eq!(ValueType::parse("Double"), Some(ValueType::Decimal));
        assert_eq!(ValueType::parse("datetime"), Some(ValueType::DateTime));
        assert_eq!(ValueType::parse("blob"), None);
        assert!(ValueType::Integer.is_bare_literal());
        assert!(!ValueType::Date.is_bare_literal());
    }
}
