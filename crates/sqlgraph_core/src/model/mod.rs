pub mod current_node;

pub use current_node::CurrentNode;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use sqlgraph_error::{Result, SqlGraphError};

use crate::expr::Expression;

/// Shared handle to an immutable graph node.
///
/// Structural equality (via the content hash) and pointer identity are both
/// meaningful: graph rewrites key on identity so that two structurally equal
/// but distinct nodes are never conflated, while CTE deduplication and test
/// assertions use equality. Use [`same_node`] for the identity comparison.
pub type ModelHandle = Arc<SqlModel>;

/// True if both handles point at the same underlying node object.
pub fn same_node(a: &ModelHandle, b: &ModelHandle) -> bool {
    Arc::ptr_eq(a, b)
}

/// The kind of SQL artifact a node compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Materialization {
    /// External, pre-existing object; referenced by name, never compiled.
    Source,
    /// Pure composition, no SQL of its own.
    VirtualNode,
    /// Inlined as a `with` clause into the referencing statement.
    Cte,
    /// The final statement, emitted bare.
    Query,
    View,
    Table,
    TempTable,
}

impl Materialization {
    /// Whether this node compiles to a standalone SQL statement.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Materialization::Query
                | Materialization::View
                | Materialization::Table
                | Materialization::TempTable
        )
    }

    /// Whether the statement leaves an object behind after the transaction.
    pub fn has_lasting_effect(&self) -> bool {
        matches!(self, Materialization::View | Materialization::Table)
    }

    /// Whether a referencing node may inline this node as a CTE.
    pub fn is_cte(&self) -> bool {
        matches!(self, Materialization::Cte | Materialization::Query)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Materialization::Source => "source",
            Materialization::VirtualNode => "virtual_node",
            Materialization::Cte => "cte",
            Materialization::Query => "query",
            Materialization::View => "view",
            Materialization::Table => "table",
            Materialization::TempTable => "temp_table",
        }
    }
}

impl fmt::Display for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value bound to a `{name}` placeholder in a node's SQL template.
#[derive(Debug, Clone)]
pub enum PlaceholderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PartialEq for PlaceholderValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PlaceholderValue::Str(a), PlaceholderValue::Str(b)) => a == b,
            (PlaceholderValue::Int(a), PlaceholderValue::Int(b)) => a == b,
            (PlaceholderValue::Float(a), PlaceholderValue::Float(b)) => {
                a.to_bits() == b.to_bits()
            }
            (PlaceholderValue::Bool(a), PlaceholderValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PlaceholderValue {}

impl fmt::Display for PlaceholderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderValue::Str(v) => write!(f, "{v}"),
            PlaceholderValue::Int(v) => write!(f, "{v}"),
            PlaceholderValue::Float(v) => write!(f, "{v:?}"),
            PlaceholderValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PlaceholderValue {
    fn from(v: &str) -> Self {
        PlaceholderValue::Str(v.to_string())
    }
}

impl From<String> for PlaceholderValue {
    fn from(v: String) -> Self {
        PlaceholderValue::Str(v)
    }
}

impl From<i64> for PlaceholderValue {
    fn from(v: i64) -> Self {
        PlaceholderValue::Int(v)
    }
}

/// An immutable node in the SQL model graph.
///
/// A node holds a SQL template with named placeholders, the values for those
/// placeholders, named references to child nodes, a materialization kind, and
/// (for dataframe-produced nodes) the expression that produced each output
/// column. Nodes are never mutated; "modifying" one means building a new node
/// through [`SqlModel::copy_override`]. A node may be referenced from many
/// parents, so callers must never assume single-parent ownership.
#[derive(Debug)]
pub struct SqlModel {
    generic_name: String,
    sql: String,
    placeholders: IndexMap<String, PlaceholderValue>,
    references: IndexMap<String, ModelHandle>,
    materialization: Materialization,
    materialization_name: Option<String>,
    column_expressions: IndexMap<String, Expression>,
    /// Bookkeeping link to the node a sample materialization replaced. Not a
    /// SQL dependency: graph traversal must never follow it.
    previous: Option<ModelHandle>,
    /// Content hash over sql, formatted placeholders, and referenced hashes.
    /// Materialization, materialization name, and column metadata do not
    /// participate.
    content_hash: String,
}

impl SqlModel {
    pub fn builder(generic_name: impl Into<String>, sql: impl Into<String>) -> SqlModelBuilder {
        SqlModelBuilder {
            generic_name: generic_name.into(),
            sql: sql.into(),
            placeholders: IndexMap::new(),
            references: IndexMap::new(),
            materialization: Materialization::Cte,
            materialization_name: None,
            column_expressions: IndexMap::new(),
            previous: None,
        }
    }

    /// Start building a copy of this node with some fields replaced.
    ///
    /// Every field not explicitly overridden keeps this node's value.
    pub fn copy_override(&self) -> SqlModelBuilder {
        SqlModelBuilder {
            generic_name: self.generic_name.clone(),
            sql: self.sql.clone(),
            placeholders: self.placeholders.clone(),
            references: self.references.clone(),
            materialization: self.materialization,
            materialization_name: self.materialization_name.clone(),
            column_expressions: self.column_expressions.clone(),
            previous: self.previous.clone(),
        }
    }

    /// Annotate a node with column expressions, leaving its SQL,
    /// placeholders, references, and materialization untouched.
    pub fn annotated(
        node: &SqlModel,
        column_expressions: IndexMap<String, Expression>,
    ) -> ModelHandle {
        node.copy_override()
            .column_expressions(column_expressions)
            .build()
    }

    /// A node wrapping an externally materialized random sample.
    ///
    /// Keeps `previous` so sample-aware callers can reconstruct what came
    /// before the sample without it being a real dependency edge.
    pub fn sample(
        generic_name: impl Into<String>,
        table_name: &str,
        previous: ModelHandle,
        column_expressions: IndexMap<String, Expression>,
    ) -> ModelHandle {
        SqlModel::builder(generic_name, "select * from {table_name}")
            .placeholder("table_name", PlaceholderValue::from(table_name))
            .column_expressions(column_expressions)
            .previous(previous)
            .build()
    }

    pub fn generic_name(&self) -> &str {
        &self.generic_name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn placeholders(&self) -> &IndexMap<String, PlaceholderValue> {
        &self.placeholders
    }

    pub fn references(&self) -> &IndexMap<String, ModelHandle> {
        &self.references
    }

    pub fn materialization(&self) -> Materialization {
        self.materialization
    }

    pub fn materialization_name(&self) -> Option<&str> {
        self.materialization_name.as_deref()
    }

    pub fn column_expressions(&self) -> &IndexMap<String, Expression> {
        &self.column_expressions
    }

    /// Ordered output column names.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.column_expressions.keys().map(|k| k.as_str())
    }

    pub fn previous(&self) -> Option<&ModelHandle> {
        self.previous.as_ref()
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The reference name under which other nodes point at this one.
    pub fn reference_name(&self) -> String {
        format!("reference{}", self.content_hash)
    }
}

impl PartialEq for SqlModel {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

impl Eq for SqlModel {}

impl Hash for SqlModel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content_hash.hash(state);
    }
}

/// Builder for [`SqlModel`], doubling as the copy-override surface.
#[derive(Debug)]
pub struct SqlModelBuilder {
    generic_name: String,
    sql: String,
    placeholders: IndexMap<String, PlaceholderValue>,
    references: IndexMap<String, ModelHandle>,
    materialization: Materialization,
    materialization_name: Option<String>,
    column_expressions: IndexMap<String, Expression>,
    previous: Option<ModelHandle>,
}

impl SqlModelBuilder {
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn placeholder(mut self, name: impl Into<String>, value: PlaceholderValue) -> Self {
        self.placeholders.insert(name.into(), value);
        self
    }

    pub fn placeholders(mut self, placeholders: IndexMap<String, PlaceholderValue>) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn reference(mut self, name: impl Into<String>, model: ModelHandle) -> Self {
        self.references.insert(name.into(), model);
        self
    }

    pub fn references(mut self, references: IndexMap<String, ModelHandle>) -> Self {
        self.references = references;
        self
    }

    pub fn materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    pub fn materialization_name(mut self, name: Option<String>) -> Self {
        self.materialization_name = name;
        self
    }

    pub fn column_expression(mut self, name: impl Into<String>, expr: Expression) -> Self {
        self.column_expressions.insert(name.into(), expr);
        self
    }

    pub fn column_expressions(mut self, exprs: IndexMap<String, Expression>) -> Self {
        self.column_expressions = exprs;
        self
    }

    pub fn previous(mut self, previous: ModelHandle) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn build(self) -> ModelHandle {
        let content_hash =
            compute_content_hash(&self.sql, &self.placeholders, &self.references);
        Arc::new(SqlModel {
            generic_name: self.generic_name,
            sql: self.sql,
            placeholders: self.placeholders,
            references: self.references,
            materialization: self.materialization,
            materialization_name: self.materialization_name,
            column_expressions: self.column_expressions,
            previous: self.previous,
            content_hash,
        })
    }
}

fn compute_content_hash(
    sql: &str,
    placeholders: &IndexMap<String, PlaceholderValue>,
    references: &IndexMap<String, ModelHandle>,
) -> String {
    let mut placeholder_parts: Vec<String> = placeholders
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    placeholder_parts.sort();

    let mut reference_parts: Vec<String> = references
        .iter()
        .map(|(name, model)| format!("{name}={}", model.content_hash()))
        .collect();
    reference_parts.sort();

    let payload = format!(
        "sql={sql};placeholders=[{}];references=[{}]",
        placeholder_parts.join(","),
        reference_parts.join(","),
    );
    format!("{:x}", md5::compute(payload.as_bytes()))
}

/// Union a base reference map with the model references found in the given
/// expressions.
///
/// Errors if one reference name ends up claimed by models with different
/// content: that means two conflicting aliases for the same slot, which would
/// silently generate wrong SQL if allowed through.
pub fn construct_references(
    base: IndexMap<String, ModelHandle>,
    exprs: &[Expression],
) -> Result<IndexMap<String, ModelHandle>> {
    let mut references = base;
    for expr in exprs {
        for (name, model) in expr.get_references() {
            match references.get(&name) {
                Some(existing) if existing.content_hash() != model.content_hash() => {
                    return Err(SqlGraphError::new(format!(
                        "reference name '{name}' points at two different models"
                    )));
                }
                Some(_) => {}
                None => {
                    references.insert(name, model);
                }
            }
        }
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_model(sql: &str) -> ModelHandle {
        SqlModel::builder("Simple", sql).build()
    }

    #[test]
    fn copy_override_leaves_original_untouched() {
        let model = simple_model("select 1");
        let changed = model
            .copy_override()
            .materialization(Materialization::View)
            .materialization_name(Some("v".to_string()))
            .build();

        assert_eq!(Materialization::Cte, model.materialization());
        assert_eq!(Materialization::View, changed.materialization());
        assert_eq!(Some("v"), changed.materialization_name());
        assert!(!same_node(&model, &changed));
    }

    #[test]
    fn hash_ignores_materialization_metadata() {
        let a = simple_model("select 1");
        let b = SqlModel::builder("Other", "select 1")
            .materialization(Materialization::Table)
            .materialization_name(Some("t".to_string()))
            .column_expression("x", crate::expr::Expression::raw("1"))
            .build();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn hash_covers_sql_placeholders_references() {
        let base = simple_model("select 1");

        let other_sql = simple_model("select 2");
        assert_ne!(base.content_hash(), other_sql.content_hash());

        let with_placeholder = base
            .copy_override()
            .placeholder("limit", PlaceholderValue::Int(10))
            .build();
        assert_ne!(base.content_hash(), with_placeholder.content_hash());

        let with_reference = base.copy_override().reference("dep", other_sql).build();
        assert_ne!(base.content_hash(), with_reference.content_hash());
    }

    #[test]
    fn reference_name_is_hash_derived() {
        let model = simple_model("select 1");
        assert_eq!(
            format!("reference{}", model.content_hash()),
            model.reference_name()
        );
    }

    #[test]
    fn identity_differs_from_equality() {
        let a = simple_model("select 1");
        let b = simple_model("select 1");
        assert_eq!(a, b);
        assert!(!same_node(&a, &b));
        assert!(same_node(&a, &a.clone()));
    }

    #[test]
    fn construct_references_unions_and_checks_conflicts() {
        let dep = simple_model("select 1");
        let expr = crate::expr::Expression::model_reference(dep.clone());

        let mut base = IndexMap::new();
        base.insert("prev".to_string(), simple_model("select 0"));

        let refs = construct_references(base, &[expr]).unwrap();
        assert_eq!(2, refs.len());
        assert!(refs.contains_key("prev"));
        assert!(refs.contains_key(&dep.reference_name()));

        // Same name bound to a different model is a hard error.
        let other = simple_model("select 2");
        let mut conflicting = IndexMap::new();
        conflicting.insert(dep.reference_name(), other);
        let expr = crate::expr::Expression::model_reference(dep);
        assert!(construct_references(conflicting, &[expr]).is_err());
    }

    #[test]
    fn annotated_only_adds_column_metadata() {
        let plain = SqlModel::builder("Plain", "select 1 as x")
            .materialization(Materialization::View)
            .build();
        let mut columns = IndexMap::new();
        columns.insert("x".to_string(), crate::expr::Expression::raw("1"));

        let annotated = SqlModel::annotated(&plain, columns);
        assert_eq!(plain.sql(), annotated.sql());
        assert_eq!(plain.materialization(), annotated.materialization());
        assert_eq!(plain.content_hash(), annotated.content_hash());
        assert_eq!(vec!["x"], annotated.columns().collect::<Vec<_>>());
    }

    #[test]
    fn sample_keeps_previous_out_of_references() {
        let previous = simple_model("select 1");
        let sample = SqlModel::sample("Sampled", "tmp_sample", previous.clone(), IndexMap::new());
        assert!(sample.references().is_empty());
        assert!(same_node(sample.previous().unwrap(), &previous));
        assert_eq!(
            Some(&PlaceholderValue::Str("tmp_sample".to_string())),
            sample.placeholders().get("table_name")
        );
    }

    #[test]
    fn materialization_flags() {
        assert!(Materialization::Query.is_statement());
        assert!(Materialization::TempTable.is_statement());
        assert!(!Materialization::Cte.is_statement());

        assert!(Materialization::View.has_lasting_effect());
        assert!(Materialization::Table.has_lasting_effect());
        assert!(!Materialization::TempTable.has_lasting_effect());

        assert!(Materialization::Cte.is_cte());
        assert!(Materialization::Query.is_cte());
        assert!(!Materialization::View.is_cte());
        assert!(!Materialization::Source.is_cte());
    }
}
