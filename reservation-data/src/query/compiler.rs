//! Plan-to-SQL compilation
//!
//! The compiler walks a [`QueryModel`] once, producing SQL text and an
//! ordered parameter list. Literal values become `@q{n}` parameters; member
//! references resolve through entity metadata, so an unknown member fails
//! here, before any I/O. The root entity is always aliased `t0`.

use std::sync::Arc;

use crate::binder::{self, Command};
use crate::metadata::EntityMetadata;
use crate::repository::{RepositoryError, RepositoryResult};
use crate::sql::Dialect;
use crate::value::{DeclaredType, Value, ValueType};

use super::expr::{AggregateFunction, CompareOp, Expr};
use super::model::{AggregateDescriptor, QueryModel};

const ROOT_ALIAS: &str = "t0";
const DERIVED_ALIAS: &str = "q";

/// What the compiled statement returns
#[derive(Debug, Clone, Copy)]
pub enum Terminal<'a> {
    /// Result rows; `entity` demands the root entity's columns in metadata order
    Rows { entity: bool },
    /// One `row_count` column
    Count,
    /// One `has_rows` column holding 1 or 0
    Any,
    /// One row of named aggregates over the whole plan
    Aggregates(&'a [AggregateDescriptor]),
}

/// Compile a plan over `root` into a parameterised command
pub fn compile(
    dialect: Dialect,
    root: &Arc<EntityMetadata>,
    model: &QueryModel,
    terminal: Terminal<'_>,
) -> RepositoryResult<Command> {
    let mut compiler = Compiler::new(dialect, root, model)?;
    let sql = match terminal {
        Terminal::Rows { entity } => compiler.select(entity, true)?,
        Terminal::Count => {
            let shaped = model.distinct
                || model.group.is_some()
                || model.projection.is_some()
                || model.pagination.is_some();
            if shaped {
                let inner = compiler.select(false, false)?;
                format!("SELECT COUNT(*) AS row_count FROM ({inner}) AS {DERIVED_ALIAS}")
            } else {
                format!("SELECT COUNT(*) AS row_count{}", compiler.body(false)?)
            }
        }
        Terminal::Any => {
            let inner = compiler.select(false, false)?;
            format!("SELECT CASE WHEN EXISTS ({inner}) THEN 1 ELSE 0 END AS has_rows")
        }
        Terminal::Aggregates(descriptors) => compiler.aggregates(descriptors)?,
    };
    compiler.command.sql = sql;

    tracing::trace!(
        entity = %root.entity_name,
        sql = %compiler.command.sql,
        params = compiler.command.params.len(),
        "Compiled query plan"
    );
    Ok(compiler.command)
}

fn invalid(message: impl Into<String>) -> RepositoryError {
    RepositoryError::invalid_query(message)
}

/// Aliases are written into SQL unquoted
fn identifier(name: &str, what: &str) -> RepositoryResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(invalid(format!("{what} '{name}' is not a plain identifier")))
    }
}

struct Source {
    alias: String,
    metadata: Arc<EntityMetadata>,
}

/// How bare member names resolve
enum Scope<'s> {
    /// Against the root and joined tables
    Tables,
    /// Against the columns of a derived table, as `(name, column)` pairs
    Derived(&'s [(String, String)]),
}

struct Compiler<'m> {
    dialect: Dialect,
    model: &'m QueryModel,
    sources: Vec<Source>,
    command: Command,
}

impl<'m> Compiler<'m> {
    fn new(
        dialect: Dialect,
        root: &Arc<EntityMetadata>,
        model: &'m QueryModel,
    ) -> RepositoryResult<Self> {
        let mut sources = vec![Source {
            alias: ROOT_ALIAS.to_string(),
            metadata: Arc::clone(root),
        }];
        for join in &model.joins {
            identifier(&join.alias, "Join alias")?;
            if join.alias.eq_ignore_ascii_case(DERIVED_ALIAS)
                || sources.iter().any(|s| s.alias.eq_ignore_ascii_case(&join.alias))
            {
                return Err(invalid(format!(
                    "Join alias '{}' is reserved or already in use",
                    join.alias
                )));
            }
            sources.push(Source {
                alias: join.alias.clone(),
                metadata: (join.resolver)()?,
            });
        }

        if !model.having.is_empty() && model.group.is_none() {
            return Err(invalid("having requires group_by"));
        }

        Ok(Self {
            dialect,
            model,
            sources,
            command: Command::default(),
        })
    }

    fn root(&self) -> &EntityMetadata {
        &self.sources[0].metadata
    }

    fn select(&mut self, entity: bool, ordered: bool) -> RepositoryResult<String> {
        let model = self.model;
        if entity && model.projection.is_none() {
            if model.group.is_some() {
                return Err(invalid(
                    "A grouped plan cannot materialise entities; select the grouped columns",
                ));
            }
            if !model.joins.is_empty() {
                return Err(invalid(
                    "A joined plan cannot materialise entities; select the result columns",
                ));
            }
        }

        let items = self.select_list()?;
        let distinct = if model.distinct { "DISTINCT " } else { "" };
        let body = self.body(ordered)?;
        Ok(format!("SELECT {distinct}{}{body}", items.join(", ")))
    }

    fn select_list(&mut self) -> RepositoryResult<Vec<String>> {
        let model = self.model;
        let mut items = Vec::new();
        match (&model.projection, &model.group) {
            (Some(projection), group) => {
                let has_aggregate = projection.columns.iter().any(|(_, e)| e.contains_aggregate());
                for (alias, expr) in &projection.columns {
                    identifier(alias, "Projection alias")?;
                    let plain = !expr.contains_aggregate() && expr.references_member();
                    match group {
                        None if plain && has_aggregate => {
                            return Err(invalid(format!(
                                "Column '{alias}' is mixed with aggregates without group_by"
                            )))
                        }
                        Some(group) if plain && !group.keys.contains(expr) => {
                            return Err(invalid(format!(
                                "Column '{alias}' is neither grouped nor aggregated"
                            )))
                        }
                        _ => {}
                    }
                    let sql = self.render(expr, &Scope::Tables, true)?;
                    items.push(format!("{sql} AS {alias}"));
                }
            }
            (None, Some(group)) => {
                for (i, key) in group.keys.iter().enumerate() {
                    let sql = self.render(key, &Scope::Tables, false)?;
                    let alias = match key {
                        Expr::Member { name, .. } => name.clone(),
                        _ => format!("g{i}"),
                    };
                    items.push(format!("{sql} AS {alias}"));
                }
            }
            (None, None) => {
                items.extend(
                    self.root()
                        .columns
                        .iter()
                        .map(|c| format!("{ROOT_ALIAS}.{}", c.column_name)),
                );
            }
        }
        if items.is_empty() {
            return Err(invalid("The plan selects no columns"));
        }
        Ok(items)
    }

    /// FROM through pagination; ordering is kept when `ordered` or paginated
    fn body(&mut self, ordered: bool) -> RepositoryResult<String> {
        let model = self.model;
        let mut sql = self.from_clause()?;

        if !model.filters.is_empty() {
            let mut predicates = Vec::with_capacity(model.filters.len());
            for filter in &model.filters {
                predicates.push(self.render(&filter.predicate, &Scope::Tables, false)?);
            }
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if let Some(group) = &model.group {
            let mut keys = Vec::with_capacity(group.keys.len());
            for key in &group.keys {
                if key.contains_aggregate() {
                    return Err(invalid("Cannot group by an aggregate"));
                }
                keys.push(self.render(key, &Scope::Tables, false)?);
            }
            if keys.is_empty() {
                return Err(invalid("group_by needs at least one key"));
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }

        if !model.having.is_empty() {
            let mut predicates = Vec::with_capacity(model.having.len());
            for filter in &model.having {
                predicates.push(self.render(&filter.predicate, &Scope::Tables, true)?);
            }
            sql.push_str(" HAVING ");
            sql.push_str(&predicates.join(" AND "));
        }

        if ordered || model.pagination.is_some() {
            sql.push_str(&self.order_clause()?);
        }
        sql.push_str(&self.page_clause());
        Ok(sql)
    }

    fn from_clause(&mut self) -> RepositoryResult<String> {
        let model = self.model;
        let mut sql = format!(
            " FROM {} AS {ROOT_ALIAS}",
            self.dialect.quote_table(&self.root().table_name)
        );
        for (i, join) in model.joins.iter().enumerate() {
            let table = self.dialect.quote_table(&self.sources[i + 1].metadata.table_name);
            let on = self.render(&join.predicate, &Scope::Tables, false)?;
            sql.push_str(&format!(" {} {table} AS {} ON {on}", join.kind, join.alias));
        }
        Ok(sql)
    }

    fn order_clause(&mut self) -> RepositoryResult<String> {
        let model = self.model;
        let orders = model.sorted_orders();
        if orders.is_empty() {
            // OFFSET/FETCH is only valid after ORDER BY
            return Ok(match (self.dialect, model.pagination) {
                (Dialect::SqlServer, Some(_)) => " ORDER BY (SELECT NULL)".to_string(),
                _ => String::new(),
            });
        }

        let mut keys = Vec::with_capacity(orders.len());
        for order in orders {
            let key = match self.projection_alias(&order.key) {
                Some(alias) => alias,
                None => self.render(&order.key, &Scope::Tables, model.group.is_some())?,
            };
            keys.push(format!("{key} {}", order.direction));
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }

    /// A bare name that is a projection alias and not a root member
    fn projection_alias(&self, key: &Expr) -> Option<String> {
        let Expr::Member { source: None, name } = key else {
            return None;
        };
        let projection = self.model.projection.as_ref()?;
        if self.root().column(name).is_some() {
            return None;
        }
        projection
            .columns
            .iter()
            .find(|(alias, _)| alias == name)
            .map(|(alias, _)| alias.clone())
    }

    fn page_clause(&mut self) -> String {
        let Some(page) = self.model.pagination else {
            return String::new();
        };
        match self.dialect {
            Dialect::SqlServer => {
                let mut sql = format!(" OFFSET {} ROWS", self.int(page.offset));
                if let Some(limit) = page.limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", self.int(limit)));
                }
                sql
            }
            Dialect::Postgres => {
                let mut sql = String::new();
                if let Some(limit) = page.limit {
                    sql.push_str(&format!(" LIMIT {}", self.int(limit)));
                }
                if page.offset > 0 {
                    sql.push_str(&format!(" OFFSET {}", self.int(page.offset)));
                }
                sql
            }
            Dialect::Sqlite => match (page.limit, page.offset) {
                (Some(limit), 0) => format!(" LIMIT {}", self.int(limit)),
                (Some(limit), offset) => {
                    let limit = self.int(limit);
                    format!(" LIMIT {limit} OFFSET {}", self.int(offset))
                }
                (None, 0) => String::new(),
                (None, offset) => format!(" LIMIT -1 OFFSET {}", self.int(offset)),
            },
        }
    }

    fn aggregates(&mut self, descriptors: &[AggregateDescriptor]) -> RepositoryResult<String> {
        let model = self.model;
        if descriptors.is_empty() {
            return Err(invalid("No aggregates requested"));
        }
        if model.group.is_some() {
            return Err(invalid(
                "Aggregate terminals run over the whole plan; select aggregates on a grouped plan instead",
            ));
        }

        let wrap = model.pagination.is_some() || model.distinct || model.projection.is_some();
        if !wrap {
            let items = self.aggregate_items(descriptors, &Scope::Tables)?;
            let body = self.body(false)?;
            return Ok(format!("SELECT {}{body}", items.join(", ")));
        }

        let inner = self.select(false, false)?;
        let columns: Vec<(String, String)> = match &model.projection {
            Some(projection) => projection
                .columns
                .iter()
                .map(|(alias, _)| (alias.clone(), alias.clone()))
                .collect(),
            None => self
                .root()
                .columns
                .iter()
                .map(|c| (c.member.clone(), c.column_name.clone()))
                .collect(),
        };
        let items = self.aggregate_items(descriptors, &Scope::Derived(&columns))?;
        Ok(format!(
            "SELECT {} FROM ({inner}) AS {DERIVED_ALIAS}",
            items.join(", ")
        ))
    }

    fn aggregate_items(
        &mut self,
        descriptors: &[AggregateDescriptor],
        scope: &Scope<'_>,
    ) -> RepositoryResult<Vec<String>> {
        let mut items = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            identifier(&descriptor.name, "Aggregate name")?;
            if let Some(selector) = &descriptor.selector {
                if selector.contains_aggregate() {
                    return Err(invalid(format!(
                        "Aggregate '{}' nests another aggregate",
                        descriptor.name
                    )));
                }
            }
            let expr = Expr::Aggregate {
                function: descriptor.function,
                argument: descriptor.selector.clone().map(Box::new),
            };
            let sql = self.render(&expr, scope, true)?;
            items.push(format!("{sql} AS {}", descriptor.name));
        }
        Ok(items)
    }

    fn render(&mut self, expr: &Expr, scope: &Scope<'_>, aggregates: bool) -> RepositoryResult<String> {
        Ok(match expr {
            Expr::Member { source, name } => self.member(source.as_deref(), name, scope)?.0,
            Expr::Literal(value) => self.literal(value, None),
            Expr::Compare { op, left, right } => match null_test(*op, left, right) {
                Some((operand, negated)) => {
                    let sql = self.render(operand, scope, aggregates)?;
                    if negated {
                        format!("{sql} IS NOT NULL")
                    } else {
                        format!("{sql} IS NULL")
                    }
                }
                None => {
                    let left_hint = self.hint(left, scope);
                    let right_hint = self.hint(right, scope);
                    let l = self.operand(left, right_hint, scope, aggregates)?;
                    let r = self.operand(right, left_hint, scope, aggregates)?;
                    format!("{l} {op} {r}")
                }
            },
            Expr::And(a, b) => {
                let a = self.render(a, scope, aggregates)?;
                let b = self.render(b, scope, aggregates)?;
                format!("({a} AND {b})")
            }
            Expr::Or(a, b) => {
                let a = self.render(a, scope, aggregates)?;
                let b = self.render(b, scope, aggregates)?;
                format!("({a} OR {b})")
            }
            Expr::Not(e) => format!("NOT ({})", self.render(e, scope, aggregates)?),
            Expr::IsNull(e) => format!("{} IS NULL", self.render(e, scope, aggregates)?),
            Expr::IsNotNull(e) => format!("{} IS NOT NULL", self.render(e, scope, aggregates)?),
            Expr::Like { operand, pattern } => {
                let operand = self.render(operand, scope, aggregates)?;
                let pattern = self.operand(pattern, None, scope, aggregates)?;
                format!("{operand} LIKE {pattern}")
            }
            Expr::InList { operand, values } => {
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                let hint = self.hint(operand, scope);
                let operand = self.render(operand, scope, aggregates)?;
                let mut list = Vec::with_capacity(values.len());
                for value in values {
                    list.push(self.operand(value, hint, scope, aggregates)?);
                }
                format!("{operand} IN ({})", list.join(", "))
            }
            Expr::Aggregate { function, argument } => {
                if !aggregates {
                    return Err(invalid(
                        "Aggregates are only allowed in projections, having and grouped ordering",
                    ));
                }
                let inner = match argument {
                    Some(argument) => {
                        if argument.contains_aggregate() {
                            return Err(invalid("Aggregates cannot be nested"));
                        }
                        self.render(argument, scope, false)?
                    }
                    None if *function == AggregateFunction::Count => "*".to_string(),
                    None => return Err(invalid(format!("{function} requires an argument"))),
                };
                self.aggregate_sql(*function, &inner)
            }
        })
    }

    fn aggregate_sql(&self, function: AggregateFunction, inner: &str) -> String {
        match (self.dialect, function) {
            (Dialect::SqlServer, AggregateFunction::Average) => {
                format!("AVG(CAST({inner} AS FLOAT))")
            }
            // NUMERIC results would not decode as floats
            (Dialect::Postgres, AggregateFunction::Average | AggregateFunction::Sum) => {
                format!("CAST({function}({inner}) AS DOUBLE PRECISION)")
            }
            (_, function) => format!("{function}({inner})"),
        }
    }

    /// Render an operand, binding literals with the other side's column type
    fn operand(
        &mut self,
        expr: &Expr,
        hint: Option<DeclaredType>,
        scope: &Scope<'_>,
        aggregates: bool,
    ) -> RepositoryResult<String> {
        match expr {
            Expr::Literal(value) => Ok(self.literal(value, hint)),
            other => self.render(other, scope, aggregates),
        }
    }

    fn hint(&self, expr: &Expr, scope: &Scope<'_>) -> Option<DeclaredType> {
        match expr {
            Expr::Member { source, name } => self
                .member(source.as_deref(), name, scope)
                .ok()
                .and_then(|(_, declared)| declared),
            _ => None,
        }
    }

    fn member(
        &self,
        source: Option<&str>,
        name: &str,
        scope: &Scope<'_>,
    ) -> RepositoryResult<(String, Option<DeclaredType>)> {
        match scope {
            Scope::Derived(columns) => {
                if let Some(source) = source {
                    return Err(invalid(format!(
                        "Member '{source}.{name}' is not visible over the paged or projected result"
                    )));
                }
                columns
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, column)| (format!("{DERIVED_ALIAS}.{column}"), None))
                    .ok_or_else(|| invalid(format!("Unknown result column '{name}'")))
            }
            Scope::Tables => {
                let source = match source {
                    None => &self.sources[0],
                    Some(alias) => self
                        .sources
                        .iter()
                        .find(|s| s.alias == alias)
                        .ok_or_else(|| invalid(format!("Unknown join alias '{alias}'")))?,
                };
                let column = source.metadata.column(name).ok_or_else(|| {
                    invalid(format!(
                        "Unknown member '{name}' on {}",
                        source.metadata.entity_name
                    ))
                    .with_entity(&source.metadata.entity_name)
                })?;
                Ok((
                    format!("{}.{}", source.alias, column.column_name),
                    Some(column.declared),
                ))
            }
        }
    }

    fn literal(&mut self, value: &Value, hint: Option<DeclaredType>) -> String {
        let name = format!("q{}", self.command.params.len());
        let declared = hint.unwrap_or_else(|| {
            DeclaredType::nullable(value.value_type().unwrap_or(ValueType::Text))
        });
        binder::bind(&mut self.command, name.clone(), value.clone(), declared);
        format!("@{name}")
    }

    fn int(&mut self, value: u64) -> String {
        let value = Value::Int(i64::try_from(value).unwrap_or(i64::MAX));
        self.literal(&value, Some(DeclaredType::required(ValueType::Int)))
    }
}

/// `x = NULL` and `x <> NULL` become null tests; returns the operand and
/// whether the test is negated
fn null_test<'e>(op: CompareOp, left: &'e Expr, right: &'e Expr) -> Option<(&'e Expr, bool)> {
    let negated = match op {
        CompareOp::Eq => false,
        CompareOp::Ne => true,
        _ => return None,
    };
    match (left, right) {
        (operand, Expr::Literal(Value::Null)) | (Expr::Literal(Value::Null), operand) => {
            Some((operand, negated))
        }
        _ => None,
    }
}
