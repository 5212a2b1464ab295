use std::fmt;

use indexmap::IndexMap;
use sqlgraph_error::{Result, SqlGraphError};

use super::token::ExprToken;
use crate::dialect::Dialect;
use crate::model::ModelHandle;

/// Classification tag carried by an [`Expression`].
///
/// The tag refines how an expression may be combined with others and how the
/// client classifies the value it produces. Classification propagates
/// structurally, see the predicate methods on `Expression`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// No special semantics.
    Plain,
    /// Needs parenthesization when interpolated next to other expressions.
    NonAtomic,
    /// A self-contained subquery.
    IndependentSubquery,
    /// Evaluates to exactly one row/value.
    SingleValue,
    /// A constant; implies single-valued.
    ConstValue,
    /// Wraps an aggregate function call. Never constant.
    AggregateFunction,
    /// Wraps a window function call. Never constant, and explicitly not an
    /// aggregate: it does not require a GROUP BY.
    WindowFunction,
    /// Several columns fused into one logical value; compiles comma-joined.
    MultiLevel,
}

/// One element of an expression: either a leaf token or a nested expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprNode {
    Token(ExprToken),
    Expr(Expression),
}

/// An immutable tree of tokens and nested expressions.
///
/// Element order is SQL token order. Equality and hashing are structural, so
/// expressions can be used as map keys and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    kind: ExprKind,
    data: Vec<ExprNode>,
}

impl Expression {
    pub fn new(kind: ExprKind, data: Vec<ExprNode>) -> Self {
        Expression { kind, data }
    }

    pub fn from_token(token: ExprToken) -> Self {
        Expression::new(ExprKind::Plain, vec![ExprNode::Token(token)])
    }

    pub fn kind(&self) -> ExprKind {
        self.kind
    }

    pub fn data(&self) -> &[ExprNode] {
        &self.data
    }

    /// Return a copy of this expression re-tagged with the given kind.
    pub fn with_kind(&self, kind: ExprKind) -> Self {
        Expression::new(kind, self.data.clone())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::from_token(ExprToken::Raw(text.into()))
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::from_token(ExprToken::Identifier(name.into()))
    }

    pub fn string_value(value: impl Into<String>) -> Self {
        Self::from_token(ExprToken::StringValue(value.into()))
    }

    pub fn column_reference(column: impl Into<String>) -> Self {
        Self::from_token(ExprToken::ColumnReference(column.into()))
    }

    pub fn table_column_reference(table: Option<&str>, column: impl Into<String>) -> Self {
        Self::from_token(ExprToken::TableColumnReference {
            table: table.map(|t| t.to_string()),
            column: column.into(),
        })
    }

    pub fn variable(dtype: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_token(ExprToken::Variable {
            dtype: dtype.into(),
            name: name.into(),
        })
    }

    pub fn model_reference(model: ModelHandle) -> Self {
        Self::from_token(ExprToken::ModelReference(model))
    }

    /// Build an expression from a format string with `{}` holes.
    ///
    /// The number of holes must equal the number of args. Text between holes
    /// becomes raw tokens. A `NonAtomic` arg is wrapped in parentheses before
    /// insertion; this is the mechanism that keeps operator precedence intact
    /// when gluing arbitrary sub-expressions together textually.
    pub fn construct(fmt: &str, args: &[Expression]) -> Result<Self> {
        Self::construct_tagged(ExprKind::Plain, fmt, args)
    }

    /// Like [`Expression::construct`], but tags the result with `kind`.
    pub fn construct_tagged(kind: ExprKind, fmt: &str, args: &[Expression]) -> Result<Self> {
        let segments: Vec<&str> = fmt.split("{}").collect();
        if segments.len() != args.len() + 1 {
            return Err(SqlGraphError::new(format!(
                "format string has {} holes but got {} args: {fmt}",
                segments.len() - 1,
                args.len(),
            )));
        }
        let mut data = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                let arg = &args[i - 1];
                if arg.kind == ExprKind::NonAtomic {
                    data.push(ExprNode::Token(ExprToken::Raw("(".to_string())));
                    data.push(ExprNode::Expr(arg.clone()));
                    data.push(ExprNode::Token(ExprToken::Raw(")".to_string())));
                } else {
                    data.push(ExprNode::Expr(arg.clone()));
                }
            }
            if !segment.is_empty() {
                data.push(ExprNode::Token(ExprToken::Raw(segment.to_string())));
            }
        }
        Ok(Expression::new(kind, data))
    }

    /// `<expr> as <quoted name>`.
    pub fn construct_expr_as_name(expr: &Expression, name: &str) -> Result<Self> {
        Self::construct(
            "{} as {}",
            &[expr.clone(), Expression::identifier(name)],
        )
    }

    fn expr_children(&self) -> impl Iterator<Item = &Expression> {
        self.data.iter().filter_map(|node| match node {
            ExprNode::Expr(expr) => Some(expr),
            ExprNode::Token(_) => None,
        })
    }

    /// True if this evaluates to a constant.
    ///
    /// A plain token-only expression is never constant; there must be at
    /// least one expression child and all of them must be constant. Aggregate
    /// and window wrappers are never constant, regardless of their children.
    pub fn is_constant(&self) -> bool {
        match self.kind {
            ExprKind::ConstValue => true,
            ExprKind::AggregateFunction | ExprKind::WindowFunction => false,
            _ => {
                let mut any = false;
                for child in self.expr_children() {
                    if !child.is_constant() {
                        return false;
                    }
                    any = true;
                }
                any
            }
        }
    }

    /// True if this evaluates to exactly one row/value.
    pub fn is_single_value(&self) -> bool {
        match self.kind {
            ExprKind::SingleValue | ExprKind::ConstValue => true,
            _ => {
                let mut any = false;
                for child in self.expr_children() {
                    if !child.is_single_value() {
                        return false;
                    }
                    any = true;
                }
                any
            }
        }
    }

    pub fn is_independent_subquery(&self) -> bool {
        self.kind == ExprKind::IndependentSubquery
    }

    /// True if an aggregate function call occurs anywhere in the tree.
    ///
    /// A window wrapper hides the aggregates inside it: a windowed aggregate
    /// does not require a GROUP BY.
    pub fn has_aggregate_function(&self) -> bool {
        match self.kind {
            ExprKind::AggregateFunction => true,
            ExprKind::WindowFunction => false,
            _ => self.expr_children().any(|c| c.has_aggregate_function()),
        }
    }

    pub fn has_windowed_aggregate_function(&self) -> bool {
        match self.kind {
            ExprKind::WindowFunction => true,
            _ => self
                .expr_children()
                .any(|c| c.has_windowed_aggregate_function()),
        }
    }

    /// True if any immediate or nested child is a multi-level expression.
    ///
    /// Note this checks descendants, not the expression itself; callers that
    /// care about the expression proper check its kind.
    pub fn has_multi_level_expressions(&self) -> bool {
        self.expr_children()
            .any(|c| c.kind == ExprKind::MultiLevel || c.has_multi_level_expressions())
    }

    pub fn has_table_column_references(&self) -> bool {
        self.get_all_tokens()
            .iter()
            .any(|t| matches!(t, ExprToken::TableColumnReference { .. }))
    }

    /// Depth-first, left-to-right flattening of all tokens in the tree.
    pub fn get_all_tokens(&self) -> Vec<&ExprToken> {
        let mut tokens = Vec::new();
        self.collect_tokens(&mut tokens);
        tokens
    }

    fn collect_tokens<'a>(&'a self, out: &mut Vec<&'a ExprToken>) {
        for node in &self.data {
            match node {
                ExprNode::Token(token) => out.push(token),
                ExprNode::Expr(expr) => expr.collect_tokens(out),
            }
        }
    }

    /// Resolve all unqualified column references to (optionally qualified)
    /// table column references.
    ///
    /// Structure-preserving and idempotent; the result keeps this
    /// expression's kind so classification tags survive the rewrite.
    pub fn resolve_column_references(&self, table_name: Option<&str>) -> Expression {
        let data = self
            .data
            .iter()
            .map(|node| match node {
                ExprNode::Token(ExprToken::ColumnReference(column)) => {
                    ExprNode::Token(ExprToken::TableColumnReference {
                        table: table_name.map(|t| t.to_string()),
                        column: column.clone(),
                    })
                }
                ExprNode::Token(token) => ExprNode::Token(token.clone()),
                ExprNode::Expr(expr) => {
                    ExprNode::Expr(expr.resolve_column_references(table_name))
                }
            })
            .collect();
        Expression::new(self.kind, data)
    }

    /// Rename unresolved column references matching `old_name`.
    ///
    /// Resolved (table-qualified) references are left alone. Returns a flat
    /// expression of the same kind.
    pub fn replace_column_references(&self, old_name: &str, new_name: &str) -> Expression {
        let data = self
            .get_all_tokens()
            .into_iter()
            .map(|token| match token {
                ExprToken::ColumnReference(column) if column == old_name => {
                    ExprNode::Token(ExprToken::ColumnReference(new_name.to_string()))
                }
                other => ExprNode::Token(other.clone()),
            })
            .collect();
        Expression::new(self.kind, data)
    }

    /// Strip table qualification from all column references.
    ///
    /// Returns the first table name and first column name encountered as the
    /// representative pair, plus the rewritten (flat, same-kind) expression.
    /// Errors if references from two distinct tables are mixed in one
    /// expression.
    pub fn remove_table_column_references(
        &self,
    ) -> Result<(Option<String>, Option<String>, Expression)> {
        let mut table_name: Option<String> = None;
        let mut column_name: Option<String> = None;
        let mut data = Vec::new();
        for token in self.get_all_tokens() {
            match token {
                ExprToken::TableColumnReference { table, column } => {
                    if let Some(table) = table {
                        match &table_name {
                            Some(existing) if existing != table => {
                                return Err(SqlGraphError::new(format!(
                                    "expression mixes column references from two tables: \
                                     '{existing}' and '{table}'"
                                )));
                            }
                            Some(_) => {}
                            None => table_name = Some(table.clone()),
                        }
                    }
                    if column_name.is_none() {
                        column_name = Some(column.clone());
                    }
                    data.push(ExprNode::Token(ExprToken::ColumnReference(column.clone())));
                }
                other => data.push(ExprNode::Token(other.clone())),
            }
        }
        Ok((table_name, column_name, Expression::new(self.kind, data)))
    }

    /// Collect every model referenced anywhere in the tree, keyed by its
    /// reference name. The name is a pure function of the model's content
    /// hash, so duplicate keys always carry the same model.
    pub fn get_references(&self) -> IndexMap<String, ModelHandle> {
        let mut references = IndexMap::new();
        for token in self.get_all_tokens() {
            if let ExprToken::ModelReference(model) = token {
                references.insert(model.reference_name(), model.clone());
            }
        }
        references
    }

    /// Compile to SQL text for the given dialect, resolving unqualified
    /// column references against `table_name` first.
    pub fn to_sql(&self, dialect: Dialect, table_name: Option<&str>) -> Result<String> {
        self.resolve_column_references(table_name).compile(dialect)
    }

    fn compile(&self, dialect: Dialect) -> Result<String> {
        let parts = self
            .data
            .iter()
            .map(|node| match node {
                ExprNode::Token(token) => token.to_sql(dialect),
                ExprNode::Expr(expr) => expr.compile(dialect),
            })
            .collect::<Result<Vec<_>>>()?;
        // Multi-level expressions are the one place where the output shape
        // is a list rather than concatenated text.
        let separator = if self.kind == ExprKind::MultiLevel {
            ", "
        } else {
            ""
        };
        Ok(parts.join(separator))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[", self.kind)?;
        for (i, node) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match node {
                ExprNode::Token(token) => write!(f, "{token}")?,
                ExprNode::Expr(expr) => write!(f, "{expr}")?,
            }
        }
        write!(f, "]")
    }
}

/// Join expressions into one, separated by `join_str`.
///
/// Built through [`Expression::construct`], so non-atomic elements are
/// parenthesized individually.
pub fn join_expressions(exprs: &[Expression], join_str: &str) -> Result<Expression> {
    let fmt = vec!["{}"; exprs.len()].join(join_str);
    Expression::construct(&fmt, exprs)
}
