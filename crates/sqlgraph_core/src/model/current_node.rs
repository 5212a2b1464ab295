use indexmap::IndexMap;
use sqlgraph_error::Result;

use super::{Materialization, ModelHandle, SqlModel, construct_references};
use crate::dialect::Dialect;
use crate::expr::{
    Expression, VariableKey, VariableValue, join_expressions, variable_placeholders,
};

/// Builder assembling the standard "one dataframe step" query node:
/// `select [distinct] <cols> from {{prev}} [where ..] [group by ..]
/// [having ..] [order by ..] [limit ..]`.
///
/// Clause expressions may reference other graph nodes; those references are
/// unioned into the node's reference map next to `prev`. Runtime variables
/// used by any clause are resolved into placeholder values at build time.
#[derive(Debug)]
pub struct CurrentNode {
    pub name: String,
    /// Output columns, in select-list order.
    pub columns: Vec<(String, Expression)>,
    pub distinct: bool,
    pub previous: ModelHandle,
    pub where_clause: Option<Expression>,
    pub group_by: Option<Expression>,
    pub having: Option<Expression>,
    pub order_by: Option<Expression>,
    pub limit: Option<Expression>,
}

impl CurrentNode {
    pub fn new(name: impl Into<String>, previous: ModelHandle) -> Self {
        CurrentNode {
            name: name.into(),
            columns: Vec::new(),
            distinct: false,
            previous,
            where_clause: None,
            group_by: None,
            having: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn build(
        self,
        dialect: Dialect,
        variables: &IndexMap<VariableKey, VariableValue>,
    ) -> Result<ModelHandle> {
        let select_exprs = self
            .columns
            .iter()
            .map(|(name, expr)| Expression::construct_expr_as_name(expr, name))
            .collect::<Result<Vec<_>>>()?;
        let select_list = join_expressions(&select_exprs, ", ")?.to_sql(dialect, None)?;

        let mut sql = format!(
            "select {}{select_list} from {{{{prev}}}}",
            if self.distinct { "distinct " } else { "" },
        );
        for (keyword, clause) in [
            ("where", &self.where_clause),
            ("group by", &self.group_by),
            ("having", &self.having),
            ("order by", &self.order_by),
            ("limit", &self.limit),
        ] {
            if let Some(clause) = clause {
                sql.push_str(&format!(" {keyword} {}", clause.to_sql(dialect, None)?));
            }
        }

        let mut all_exprs: Vec<Expression> =
            self.columns.iter().map(|(_, expr)| expr.clone()).collect();
        all_exprs.extend(
            [
                &self.where_clause,
                &self.group_by,
                &self.having,
                &self.order_by,
                &self.limit,
            ]
            .into_iter()
            .filter_map(|clause| clause.clone()),
        );

        let mut base = IndexMap::new();
        base.insert("prev".to_string(), self.previous);
        let references = construct_references(base, &all_exprs)?;
        let placeholders = variable_placeholders(dialect, variables, &all_exprs)?;

        let column_expressions: IndexMap<String, Expression> =
            self.columns.into_iter().collect();

        Ok(SqlModel::builder(self.name, sql)
            .placeholders(placeholders)
            .references(references)
            .materialization(Materialization::Cte)
            .column_expressions(column_expressions)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaceholderValue;

    fn previous() -> ModelHandle {
        SqlModel::builder("Prev", "select 1 as a").build()
    }

    #[test]
    fn assembles_select_template() {
        let mut node = CurrentNode::new("Step", previous());
        node.columns = vec![("a".to_string(), Expression::column_reference("a"))];
        node.where_clause = Some(
            Expression::construct("{} > 0", &[Expression::column_reference("a")]).unwrap(),
        );
        node.limit = Some(Expression::raw("10"));

        let model = node.build(Dialect::Postgres, &IndexMap::new()).unwrap();
        assert_eq!(
            "select \"a\" as \"a\" from {{prev}} where \"a\" > 0 limit 10",
            model.sql()
        );
        assert_eq!(1, model.references().len());
        assert!(model.references().contains_key("prev"));
        assert_eq!(vec!["a"], model.columns().collect::<Vec<_>>());
    }

    #[test]
    fn distinct_and_group_by() {
        let mut node = CurrentNode::new("Step", previous());
        node.columns = vec![("a".to_string(), Expression::column_reference("a"))];
        node.distinct = true;
        node.group_by = Some(Expression::column_reference("a"));

        let model = node.build(Dialect::Postgres, &IndexMap::new()).unwrap();
        assert_eq!(
            "select distinct \"a\" as \"a\" from {{prev}} group by \"a\"",
            model.sql()
        );
    }

    #[test]
    fn collects_expression_references_and_variables() {
        let other = SqlModel::builder("Other", "select 2 as b").build();

        let mut node = CurrentNode::new("Step", previous());
        node.columns = vec![(
            "a".to_string(),
            Expression::construct(
                "{} + (select max(b) from {})",
                &[
                    Expression::column_reference("a"),
                    Expression::model_reference(other.clone()),
                ],
            )
            .unwrap(),
        )];
        node.where_clause = Some(
            Expression::construct(
                "{} > {}",
                &[
                    Expression::column_reference("a"),
                    Expression::variable("int64", "threshold"),
                ],
            )
            .unwrap(),
        );

        let mut variables = IndexMap::new();
        variables.insert(
            VariableKey::new("int64", "threshold"),
            VariableValue::Int64(5),
        );

        let model = node.build(Dialect::Postgres, &variables).unwrap();
        assert_eq!(2, model.references().len());
        assert!(model.references().contains_key(&other.reference_name()));
        assert_eq!(
            Some(&PlaceholderValue::Str("5".to_string())),
            model
                .placeholders()
                .get("___bach_variable___int64___threshold")
        );
    }
}
