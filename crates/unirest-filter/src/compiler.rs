//! Compiles HTTP filter parameters into remote query predicates.
//!
//! Each non-reserved query parameter is one predicate. Its value is split on
//! the literal [`OR_DELIMITER`] into an OR-group. The remote API accepts at
//! most [`MAX_OR_VALUES`] alternatives in one group; larger groups are handled
//! by the configured [`OverflowStrategy`], which is fixed per deployment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use unirest_core::{FilterPredicate, PropertyMatch, ValueType};

use crate::client::ClientPredicate;
use crate::error::FilterError;
use crate::parser::FilterParams;
use crate::schema::{EntitySchema, FieldDescriptor};

/// Hard ceiling on alternatives in a single remote OR-group.
pub const MAX_OR_VALUES: usize = 40;

/// Separator between alternatives in a filter value.
pub const OR_DELIMITER: &str = " OR ";

/// Default key carrying a raw server-side WHERE expression.
pub const DEFAULT_RAW_QUERY_KEY: &str = "query";

/// How an OR-group above the remote limit is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Fold the group into one raw `Prop = a or Prop = b ...` expression.
    #[default]
    ServerFold,
    /// Drop the group from the remote query and filter the returned rows.
    ClientFilter,
    /// Refuse the filter.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub or_limit: usize,
    pub overflow: OverflowStrategy,
    pub raw_query_key: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            or_limit: MAX_OR_VALUES,
            overflow: OverflowStrategy::default(),
            raw_query_key: DEFAULT_RAW_QUERY_KEY.to_string(),
        }
    }
}

/// Output of [`FilterCompiler::compile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledQuery {
    /// Predicates sent to the remote API.
    pub server_predicates: Vec<FilterPredicate>,
    /// Predicates applied to the rows the remote API returns.
    pub client_predicates: Vec<ClientPredicate>,
}

impl CompiledQuery {
    pub fn has_client_predicates(&self) -> bool {
        !self.client_predicates.is_empty()
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.client_predicates.iter().all(|p| p.matches(row))
    }

    /// Keep only the rows satisfying every client predicate.
    pub fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        if !self.has_client_predicates() {
            return rows;
        }
        let before = rows.len();
        let kept: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        tracing::debug!(
            fetched = before,
            kept = kept.len(),
            "applied client-side filter"
        );
        kept
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterCompiler {
    settings: CompilerSettings,
}

impl FilterCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Alternatives allowed in one structured OR-group; never above [`MAX_OR_VALUES`].
    pub fn or_limit(&self) -> usize {
        self.settings.or_limit.clamp(1, MAX_OR_VALUES)
    }

    /// Compile filter parameters against an entity schema.
    ///
    /// Every parameter is validated before anything is returned, so an
    /// invalid filter never yields a partial query.
    pub fn compile(
        &self,
        entity: &EntitySchema,
        params: &FilterParams,
    ) -> Result<CompiledQuery, FilterError> {
        let mut compiled = CompiledQuery::default();

        if let Some(raw) = params.get(&self.settings.raw_query_key)
            && !raw.trim().is_empty()
        {
            compiled
                .server_predicates
                .push(FilterPredicate::raw_where(raw));
        }

        for (key, value) in params.iter() {
            if key == self.settings.raw_query_key {
                continue;
            }

            let descriptor = entity
                .resolve(key)
                .ok_or_else(|| FilterError::unknown_property(entity.name(), key))?;

            let values = split_alternatives(descriptor, value)?;

            if values.len() <= self.or_limit() {
                let predicate = PropertyMatch::from_values(
                    descriptor.name.clone(),
                    descriptor.kind,
                    descriptor.value_type,
                    values,
                )
                .ok_or_else(|| FilterError::EmptyValue {
                    property: descriptor.name.clone(),
                })?;
                compiled.server_predicates.push(predicate.into());
                continue;
            }

            match self.settings.overflow {
                OverflowStrategy::ServerFold => {
                    let expression = fold_where(descriptor, &values)?;
                    compiled
                        .server_predicates
                        .push(FilterPredicate::raw_where(expression));
                }
                OverflowStrategy::ClientFilter => {
                    compiled.client_predicates.push(ClientPredicate {
                        property: descriptor.property_name().to_string(),
                        value_type: descriptor.value_type,
                        values: values.into_iter().collect(),
                    });
                }
                OverflowStrategy::Reject => {
                    return Err(FilterError::TooManyAlternatives {
                        property: descriptor.name.clone(),
                        count: values.len(),
                        limit: self.or_limit(),
                    });
                }
            }
        }

        Ok(compiled)
    }
}

/// Split a filter value into its normalized alternatives.
fn split_alternatives(
    descriptor: &FieldDescriptor,
    value: &str,
) -> Result<Vec<String>, FilterError> {
    let values = value
        .split(OR_DELIMITER)
        .filter(|v| !v.is_empty())
        .map(|v| {
            descriptor
                .value_type
                .normalize(v)
                .map_err(|source| FilterError::InvalidValue {
                    property: descriptor.name.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.is_empty() {
        return Err(FilterError::EmptyValue {
            property: descriptor.name.clone(),
        });
    }
    Ok(values)
}

/// Render `Prop = a or Prop = b ...` for the remote query language.
///
/// Quoted literals cannot contain a single quote; such values are refused
/// rather than escaped.
fn fold_where(descriptor: &FieldDescriptor, values: &[String]) -> Result<String, FilterError> {
    let mut terms = Vec::with_capacity(values.len());
    for value in values {
        let literal = if descriptor.value_type.is_bare_literal() {
            value.clone()
        } else if value.contains('\'') {
            return Err(FilterError::UnsafeValue {
                property: descriptor.name.clone(),
                value: value.clone(),
            });
        } else {
            format!("'{value}'")
        };
        terms.push(format!("{} = {}", descriptor.name, literal));
    }
    Ok(terms.join(" or "))
}
