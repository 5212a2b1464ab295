use std::fmt;

use sqlgraph_error::{Result, SqlGraphError};

use crate::dialect::Dialect;
use crate::model::ModelHandle;
use crate::template::escape_format_string;

/// Prefix of the placeholder name a typed runtime variable compiles to.
///
/// Wire format: `___bach_variable___<dtype>___<name>`. Externally stored
/// graphs depend on this exact spelling, triple underscores included.
pub const VARIABLE_PLACEHOLDER_PREFIX: &str = "___bach_variable___";

/// Atomic, immutable piece of a SQL fragment.
///
/// Tokens are the leaves of an [`Expression`](super::Expression) tree. Each
/// token knows how to render itself for a dialect; the output of `to_sql` must
/// survive exactly the two model-level formatting passes that follow
/// expression compilation (see the `template` module).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprToken {
    /// Opaque SQL text. Callers must double any literal braces before
    /// constructing this token.
    Raw(String),
    /// An identifier (column name, alias), quoted per dialect.
    Identifier(String),
    /// A logical string value, quoted and escaped per dialect.
    StringValue(String),
    /// An unresolved reference to a column. Must be resolved to a
    /// `TableColumnReference` before compilation.
    ColumnReference(String),
    /// A resolved column reference, optionally table-qualified.
    TableColumnReference {
        table: Option<String>,
        column: String,
    },
    /// A reference to another graph node. Compiles to a double-braced
    /// placeholder substituted by the SQL generator.
    ModelReference(ModelHandle),
    /// A named, typed runtime variable. Compiles to a placeholder resolved
    /// from the variable map at generation time.
    Variable { dtype: String, name: String },
}

impl ExprToken {
    pub fn to_sql(&self, dialect: Dialect) -> Result<String> {
        match self {
            ExprToken::Raw(text) => Ok(escape_format_string(text)),
            ExprToken::Identifier(name) => {
                Ok(escape_format_string(&dialect.quote_identifier(name)))
            }
            ExprToken::StringValue(value) => {
                Ok(escape_format_string(&dialect.quote_string(value)))
            }
            ExprToken::ColumnReference(column) => Err(SqlGraphError::new(format!(
                "column reference '{column}' must be resolved to a table column before compilation"
            ))),
            ExprToken::TableColumnReference { table, column } => {
                let sql = match table {
                    Some(table) => format!(
                        "{}.{}",
                        dialect.quote_identifier(table),
                        dialect.quote_identifier(column)
                    ),
                    None => dialect.quote_identifier(column),
                };
                Ok(escape_format_string(&sql))
            }
            ExprToken::ModelReference(model) => {
                // Double-braced: survives the placeholder pass, substituted
                // by the reference pass.
                Ok(format!("{{{{{}}}}}", model.reference_name()))
            }
            ExprToken::Variable { dtype, name } => {
                Ok(format!("{{{}}}", variable_placeholder_name(dtype, name)))
            }
        }
    }
}

impl fmt::Display for ExprToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprToken::Raw(text) => write!(f, "raw({text})"),
            ExprToken::Identifier(name) => write!(f, "identifier({name})"),
            ExprToken::StringValue(value) => write!(f, "string({value})"),
            ExprToken::ColumnReference(column) => write!(f, "column({column})"),
            ExprToken::TableColumnReference { table, column } => match table {
                Some(table) => write!(f, "table_column({table}.{column})"),
                None => write!(f, "table_column({column})"),
            },
            ExprToken::ModelReference(model) => write!(f, "model({})", model.reference_name()),
            ExprToken::Variable { dtype, name } => write!(f, "variable({dtype}, {name})"),
        }
    }
}

/// Mangle a variable's dtype and logical name into its placeholder name.
pub fn variable_placeholder_name(dtype: &str, name: &str) -> String {
    format!("{VARIABLE_PLACEHOLDER_PREFIX}{dtype}___{name}")
}

/// Inverse of [`variable_placeholder_name`].
///
/// Returns None (not an error) for placeholder names that are not variable
/// placeholders; callers routinely probe arbitrary placeholder names.
pub fn parse_variable_placeholder(placeholder: &str) -> Option<(String, String)> {
    let rest = placeholder.strip_prefix(VARIABLE_PLACEHOLDER_PREFIX)?;
    let (dtype, name) = rest.split_once("___")?;
    if dtype.is_empty() || name.is_empty() {
        return None;
    }
    Some((dtype.to_string(), name.to_string()))
}
