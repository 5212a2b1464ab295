use indexmap::{IndexMap, IndexSet};
use sqlgraph_error::{Result, SqlGraphError};

use super::expression::Expression;
use super::token::{ExprToken, variable_placeholder_name};
use crate::dialect::Dialect;
use crate::model::PlaceholderValue;

/// Identity of a typed runtime variable: its declared dtype plus logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    pub dtype: String,
    pub name: String,
}

impl VariableKey {
    pub fn new(dtype: impl Into<String>, name: impl Into<String>) -> Self {
        VariableKey {
            dtype: dtype.into(),
            name: name.into(),
        }
    }

    /// The placeholder name this variable's token compiles to.
    pub fn placeholder_name(&self) -> String {
        variable_placeholder_name(&self.dtype, &self.name)
    }
}

/// Runtime value bound to a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
}

impl VariableValue {
    /// Dtype this value infers to, matched against the declared dtype.
    pub fn dtype(&self) -> &'static str {
        match self {
            VariableValue::Int64(_) => "int64",
            VariableValue::Float64(_) => "float64",
            VariableValue::Bool(_) => "bool",
            VariableValue::String(_) => "string",
        }
    }

    /// Render as dialect-correct SQL literal text.
    pub fn to_sql_literal(&self, dialect: Dialect) -> String {
        match self {
            VariableValue::Int64(v) => v.to_string(),
            // Debug formatting keeps the decimal point so the engine reads a
            // float literal, not an integer.
            VariableValue::Float64(v) => format!("{v:?}"),
            VariableValue::Bool(v) => v.to_string(),
            VariableValue::String(v) => dialect.quote_string(v),
        }
    }
}

/// Collect the distinct variables referenced across a list of expressions.
pub fn get_variable_tokens(exprs: &[Expression]) -> IndexSet<VariableKey> {
    let mut keys = IndexSet::new();
    for expr in exprs {
        for token in expr.get_all_tokens() {
            if let ExprToken::Variable { dtype, name } = token {
                keys.insert(VariableKey::new(dtype.clone(), name.clone()));
            }
        }
    }
    keys
}

/// Compute the placeholder-name to SQL-literal map for a node's variables.
///
/// Variables not referenced by any of the given expressions are dropped
/// silently: a node may use only some of the variables known to the broader
/// graph. A value whose inferred dtype disagrees with its declared dtype is
/// an error.
pub fn variable_placeholders(
    dialect: Dialect,
    variables: &IndexMap<VariableKey, VariableValue>,
    exprs: &[Expression],
) -> Result<IndexMap<String, PlaceholderValue>> {
    let referenced = get_variable_tokens(exprs);
    let mut placeholders = IndexMap::new();
    for (key, value) in variables {
        if !referenced.contains(key) {
            continue;
        }
        if value.dtype() != key.dtype {
            return Err(SqlGraphError::new(format!(
                "variable '{}' declared as '{}' but its value has dtype '{}'",
                key.name,
                key.dtype,
                value.dtype(),
            )));
        }
        placeholders.insert(
            key.placeholder_name(),
            PlaceholderValue::Str(value.to_sql_literal(dialect)),
        );
    }
    Ok(placeholders)
}
