pub mod expression;
pub mod token;
pub mod variable;

pub use expression::{ExprKind, ExprNode, Expression, join_expressions};
pub use token::{
    ExprToken, VARIABLE_PLACEHOLDER_PREFIX, parse_variable_placeholder,
    variable_placeholder_name,
};
pub use variable::{VariableKey, VariableValue, get_variable_tokens, variable_placeholders};
