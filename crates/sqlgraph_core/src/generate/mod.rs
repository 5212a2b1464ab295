//! Linearizes a model graph into executable SQL statements.
//!
//! Compilation walks the graph bottom-up: CTE-materialized references are
//! inlined into their dependent's `with` clause, statement-materialized
//! references are compiled as separate statements and referred to by their
//! generated object name. Each compilation run keeps its own cache so a node
//! shared by many parents is rendered once.

pub mod query_parser;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use sqlgraph_error::{Result, ResultExt, SqlGraphError, not_implemented};
use tracing::debug;

use crate::dialect::Dialect;
use crate::graph::find_nodes;
use crate::model::{Materialization, ModelHandle, SqlModel, same_node};
use crate::template::{escape_format_string, format_template};
use query_parser::parse_ctes;

/// Placeholder name that always resolves to the node's own content hash.
///
/// Templates can interpolate `{{id}}` to make otherwise identical SQL bodies
/// distinct, which keeps same-named CTEs from colliding.
pub const REFERENCE_UNIQUE_FIELD: &str = "id";

/// One statement produced by [`to_sql_materialized_nodes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedStatement {
    /// Generated object name, unquoted.
    pub name: String,
    pub materialization: Materialization,
    pub sql: String,
}

/// A rendered CTE-or-select row. The last row of a node's compilation is its
/// final select; everything before it becomes a `with` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CteRow {
    /// Name as it appears in the `with` clause, already quoted if needed.
    quoted_name: String,
    sql: String,
}

/// Render cache for one compilation run. Keyed on content hash plus generated
/// object name: two equal nodes materialized under different names must not
/// share rows, since the name is baked into the final row.
type CompilerCache = HashMap<String, Vec<CteRow>>;

/// Compile the graph rooted at `model` into one SQL script.
///
/// Temp-table dependencies become leading statements; the start node's own
/// statement comes last. Statements are joined with `";\n"`.
pub fn to_sql(dialect: Dialect, model: &ModelHandle) -> Result<String> {
    let mut cache = CompilerCache::new();
    let mut selected: Vec<ModelHandle> = find_nodes(
        model,
        |m| m.materialization().is_statement() && !m.materialization().has_lasting_effect(),
        false,
    )
    .into_iter()
    .rev()
    .map(|found| found.model)
    .collect();
    if !selected.iter().any(|m| same_node(m, model)) {
        selected.push(model.clone());
    }
    check_name_uniqueness(dialect, &selected)?;

    let mut statements = Vec::new();
    for node in &selected {
        let sql = generate_statement(dialect, node, &mut cache)?;
        if !sql.is_empty() {
            statements.push(sql);
        }
    }
    Ok(statements.join(";\n"))
}

/// Compile every statement-materialized node reachable from `start` into a
/// separate named statement, dependencies first.
///
/// Unlike [`to_sql`] this also selects nodes with lasting effects (views and
/// tables). Nodes that compile to nothing (sources, virtual nodes) are
/// omitted from the result.
pub fn to_sql_materialized_nodes(
    dialect: Dialect,
    start: &ModelHandle,
    include_start_node: bool,
) -> Result<Vec<MaterializedStatement>> {
    let mut cache = CompilerCache::new();
    let mut selected: Vec<ModelHandle> =
        find_nodes(start, |m| m.materialization().is_statement(), false)
            .into_iter()
            .rev()
            .map(|found| found.model)
            .collect();
    if include_start_node && !selected.iter().any(|m| same_node(m, start)) {
        selected.push(start.clone());
    }
    check_name_uniqueness(dialect, &selected)?;

    let mut statements = Vec::new();
    for node in &selected {
        let sql = generate_statement(dialect, node, &mut cache)?;
        if sql.is_empty() {
            continue;
        }
        statements.push(MaterializedStatement {
            name: generated_object_name(dialect, node),
            materialization: node.materialization(),
            sql,
        });
    }
    Ok(statements)
}

/// The name under which a node's compiled object is known.
///
/// An explicit materialization name wins. Otherwise the name is the generic
/// name plus `___<content hash>`, with the generic name truncated so the
/// hash suffix always fits within the dialect's identifier limit.
pub fn generated_object_name(dialect: Dialect, model: &SqlModel) -> String {
    if let Some(name) = model.materialization_name() {
        return name.to_string();
    }
    let hash = model.content_hash();
    let keep = dialect
        .max_identifier_length()
        .saturating_sub(hash.len() + "___".len());
    let prefix: String = model.generic_name().chars().take(keep).collect();
    format!("{prefix}___{hash}")
}

fn check_name_uniqueness(dialect: Dialect, selected: &[ModelHandle]) -> Result<()> {
    let mut seen: HashSet<String> = HashSet::new();
    for node in selected {
        let name = generated_object_name(dialect, node);
        if !seen.insert(name.clone()) {
            return Err(SqlGraphError::new(format!(
                "generated object name '{name}' is not unique among the materialized nodes"
            )));
        }
    }
    Ok(())
}

/// Compile one selected node into a full statement: gather its CTE rows,
/// deduplicate, assemble the `with` chain, and apply the materialization
/// wrapper.
fn generate_statement(
    dialect: Dialect,
    model: &ModelHandle,
    cache: &mut CompilerCache,
) -> Result<String> {
    let rows = compile_node(dialect, model, cache)?;
    let mut rows = filter_duplicate_ctes(rows)?;

    if !model.materialization().is_statement() && rows.is_empty() {
        // Sources and virtual nodes have nothing to execute.
        return Ok(String::new());
    }
    let Some(last) = rows.pop() else {
        return Err(SqlGraphError::new(format!(
            "no models to compile for node '{}': empty sql template and no compilable \
             references",
            model.generic_name()
        )));
    };
    let select = if rows.is_empty() {
        last.sql
    } else {
        let ctes: Vec<String> = rows
            .iter()
            .map(|row| format!("{} as ({})", row.quoted_name, row.sql))
            .collect();
        format!("with {}\n{}", ctes.join(",\n"), last.sql)
    };
    wrap_materialization(dialect, model, select)
}

/// Recursively render a node and its CTE-materialized dependencies into rows.
///
/// Statement- and source-materialized references contribute no rows here;
/// they are referenced by generated name and compiled (or assumed to exist)
/// elsewhere.
fn compile_node(
    dialect: Dialect,
    model: &ModelHandle,
    cache: &mut CompilerCache,
) -> Result<Vec<CteRow>> {
    let own_name = generated_object_name(dialect, model);
    let cache_key = format!("{}:{own_name}", model.content_hash());
    if let Some(rows) = cache.get(&cache_key) {
        return Ok(rows.clone());
    }

    let mut rows: Vec<CteRow> = Vec::new();
    let mut reference_names: IndexMap<String, String> = IndexMap::new();
    for (name, child) in model.references() {
        if child.materialization().is_cte() {
            rows.extend(compile_node(dialect, child, cache)?);
        }
        reference_names.insert(
            name.clone(),
            dialect.quote_identifier(&generated_object_name(dialect, child)),
        );
    }

    if !model.sql().is_empty() {
        let sql = single_model_sql(model, &reference_names)?;
        let parsed = parse_ctes(&sql).context("failed to split node sql into ctes")?;
        for (name, body) in parsed.ctes {
            rows.push(CteRow {
                quoted_name: name,
                sql: body,
            });
        }
        rows.push(CteRow {
            quoted_name: dialect.quote_identifier(&own_name),
            sql: parsed.select,
        });
    }

    debug!(
        node = model.generic_name(),
        rows = rows.len(),
        "compiled graph node"
    );
    cache.insert(cache_key, rows.clone());
    Ok(rows)
}

/// Render one node's template: placeholder values first, reference names
/// second.
///
/// Placeholder values are escaped on substitution so the reference pass
/// cannot reinterpret them; the reference pass also resolves the
/// [`REFERENCE_UNIQUE_FIELD`] to the node's content hash.
fn single_model_sql(
    model: &SqlModel,
    reference_names: &IndexMap<String, String>,
) -> Result<String> {
    let sql = format_template(model.sql(), |name| {
        model
            .placeholders()
            .get(name)
            .map(|value| escape_format_string(&value.to_string()))
    })
    .context_fn(|| {
        format!(
            "failed to fill placeholders of node '{}' (template: {})",
            model.generic_name(),
            model.sql()
        )
    })?;

    format_template(&sql, |name| {
        if name == REFERENCE_UNIQUE_FIELD {
            Some(model.content_hash().to_string())
        } else {
            reference_names.get(name).cloned()
        }
    })
    .context_fn(|| {
        format!(
            "failed to fill references of node '{}' (template: {})",
            model.generic_name(),
            model.sql()
        )
    })
}

/// Drop repeated CTE rows with identical SQL; error when one name is claimed
/// by two different bodies.
fn filter_duplicate_ctes(rows: Vec<CteRow>) -> Result<Vec<CteRow>> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match seen.get(&row.quoted_name) {
            Some(sql) if *sql == row.sql => continue,
            Some(_) => {
                return Err(SqlGraphError::new(format!(
                    "cte name {} is used for two different sql bodies; interpolate \
                     {{{{{REFERENCE_UNIQUE_FIELD}}}}} into the template to disambiguate",
                    row.quoted_name
                )));
            }
            None => {
                seen.insert(row.quoted_name.clone(), row.sql.clone());
                out.push(row);
            }
        }
    }
    Ok(out)
}

fn wrap_materialization(dialect: Dialect, model: &SqlModel, select: String) -> Result<String> {
    let quoted_name = || dialect.quote_identifier(&generated_object_name(dialect, model));
    Ok(match model.materialization() {
        Materialization::Cte | Materialization::Query => select,
        Materialization::View => format!("create view {} as {select}", quoted_name()),
        Materialization::Table => format!("create table {} as {select}", quoted_name()),
        Materialization::TempTable => {
            if !dialect.supports_temp_tables() {
                not_implemented!("temp tables for dialect {dialect}");
            }
            match dialect {
                Dialect::Postgres => format!(
                    "create temporary table {} on commit drop as {select}",
                    quoted_name()
                ),
                Dialect::BigQuery => format!("create temp table {} as {select}", quoted_name()),
                Dialect::Athena => unreachable!("checked by supports_temp_tables"),
            }
        }
        Materialization::Source | Materialization::VirtualNode => String::new(),
    })
}
