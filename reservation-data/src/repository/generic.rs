//! Generic repository over any [`Entity`]
//!
//! Every statement is derived from the entity's resolved metadata: no
//! per-type SQL is written by hand. Writes echo computed columns back onto
//! the caller's entities when the type has any.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::{ConnectionFactory, SharedConnection};
use crate::binder::{self, Command, Row};
use crate::metadata::{self, ColumnMetadata, Entity, EntityMetadata};
use crate::query::{col, Query};
use crate::sql::{builder, Dialect};
use crate::value::Value;

use super::{
    DataContext, OptionalResult, RepositoryError, RepositoryOperation, RepositoryOptions,
    RepositoryResult,
};

/// CRUD and query entry point for one entity type
///
/// # Example
///
/// ```rust,ignore
/// use reservation_data::prelude::*;
///
/// let factory = Arc::new(SqliteFactory::connect("sqlite::memory:").await?);
/// let stations = GenericRepository::<Station, _>::new(factory);
///
/// let mut retiro = Station::new("Retiro", Some("Buenos Aires"));
/// stations.create(&mut retiro, &cancel).await?;
/// assert_ne!(retiro.id, 0);
/// ```
pub struct GenericRepository<T, F: ConnectionFactory> {
    context: Arc<DataContext<F>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, F: ConnectionFactory> Clone for GenericRepository<T, F> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, F: ConnectionFactory> GenericRepository<T, F> {
    /// Repository that opens a connection per call
    pub fn new(factory: Arc<F>) -> Self {
        Self::from_context(Arc::new(DataContext::new(factory)))
    }

    /// Repository scoped to a caller-supplied connection or transaction
    ///
    /// Calls through repositories sharing the connection are serialized.
    pub fn with_connection(factory: Arc<F>, connection: SharedConnection<F::Connection>) -> Self {
        Self::from_context(Arc::new(DataContext::with_connection(factory, connection)))
    }

    /// Repository over an existing context, e.g. one shared by several
    /// entity types
    pub fn from_context(context: Arc<DataContext<F>>) -> Self {
        Self {
            context,
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn with_options(self, options: RepositoryOptions) -> Self {
        let context = (*self.context).clone().with_options(options);
        Self::from_context(Arc::new(context))
    }

    pub fn context(&self) -> &Arc<DataContext<F>> {
        &self.context
    }

    pub fn dialect(&self) -> Dialect {
        self.context.dialect()
    }

    fn metadata(&self, operation: RepositoryOperation) -> RepositoryResult<Arc<EntityMetadata>> {
        EntityMetadata::resolve::<T>().map_err(|e| e.with_operation(operation))
    }

    /// Every row of the mapped table
    pub async fn get_all(&self, cancel: &CancellationToken) -> RepositoryResult<Vec<T>> {
        let op = RepositoryOperation::GetAll;
        let metadata = self.metadata(op)?;
        let columns: Vec<&str> = metadata
            .columns
            .iter()
            .map(|c| c.column_name.as_str())
            .collect();
        let command = Command::new(builder::build_select_all(
            self.dialect(),
            &metadata.table_name,
            &columns,
        ));

        let rows = self
            .context
            .fetch(op, &metadata.entity_name, &command, cancel)
            .await?;
        rows.iter()
            .map(|row| metadata::materialize(&metadata, row, op))
            .collect()
    }

    /// Insert one entity; computed columns are copied back onto it
    pub async fn create(&self, entity: &mut T, cancel: &CancellationToken) -> RepositoryResult<u64> {
        let op = RepositoryOperation::Create;
        let metadata = self.metadata(op)?;
        let writable: Vec<&ColumnMetadata> = metadata.writable_columns().collect();
        let computed: Vec<&ColumnMetadata> = metadata.computed_columns().collect();

        let sql = builder::build_insert(
            self.dialect(),
            &metadata.table_name,
            &names(&writable),
            &names(&computed),
            builder::param_name,
        );
        let mut command = Command::new(sql);
        for (i, column) in writable.iter().enumerate() {
            binder::bind(
                &mut command,
                builder::param_name(i),
                entity.value(&column.member),
                column.declared,
            );
        }

        if computed.is_empty() {
            return self
                .context
                .execute(op, &metadata.entity_name, &command, cancel)
                .await;
        }

        let rows = self
            .context
            .fetch(op, &metadata.entity_name, &command, cancel)
            .await?;
        if let Some(row) = rows.first() {
            metadata::apply_echo(&metadata, entity, row, &computed, op)?;
        }
        Ok(rows.len() as u64)
    }

    /// Insert many entities in one statement
    ///
    /// Echoed rows are matched to entities by their written values; rows
    /// that match no entity uniquely fall back to position. Float columns
    /// match within single precision, so stores that round them to 4-byte
    /// reals still correlate by value.
    pub async fn create_bulk(
        &self,
        entities: &mut [T],
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        match entities {
            [] => return Ok(0),
            [single] => return self.create(single, cancel).await,
            _ => {}
        }

        let op = RepositoryOperation::CreateBulk;
        let metadata = self.metadata(op)?;
        let writable: Vec<&ColumnMetadata> = metadata.writable_columns().collect();
        let computed: Vec<&ColumnMetadata> = metadata.computed_columns().collect();

        // Multi-row DEFAULT VALUES has no portable form
        if writable.is_empty() {
            let mut affected = 0;
            for entity in entities.iter_mut() {
                affected += self.create(entity, cancel).await?;
            }
            return Ok(affected);
        }

        let echo: Vec<&ColumnMetadata> = if computed.is_empty() {
            Vec::new()
        } else {
            computed.iter().chain(writable.iter()).copied().collect()
        };
        let sql = builder::build_bulk_insert(
            self.dialect(),
            &metadata.table_name,
            &names(&writable),
            &names(&echo),
            entities.len(),
            builder::bulk_param_name,
        );
        let mut command = Command::new(sql);
        for (row, entity) in entities.iter().enumerate() {
            for (c, column) in writable.iter().enumerate() {
                binder::bind(
                    &mut command,
                    builder::bulk_param_name(row, c),
                    entity.value(&column.member),
                    column.declared,
                );
            }
        }

        tracing::debug!(
            entity = %metadata.entity_name,
            rows = entities.len(),
            "Bulk insert"
        );

        if echo.is_empty() {
            return self
                .context
                .execute(op, &metadata.entity_name, &command, cancel)
                .await;
        }

        let rows = self
            .context
            .fetch(op, &metadata.entity_name, &command, cancel)
            .await?;
        for (row, index) in correlate(entities, &rows, &writable, true) {
            metadata::apply_echo(&metadata, &mut entities[index], &rows[row], &computed, op)?;
        }
        Ok(rows.len() as u64)
    }

    /// Update one entity by key
    ///
    /// `columns` names the members to write; `None` writes every non-key,
    /// non-computed member. Returns 0 when no row has the entity's key.
    pub async fn update(
        &self,
        entity: &mut T,
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let op = RepositoryOperation::Update;
        let metadata = self.metadata(op)?;
        let set = select_columns(&metadata, columns, op)?;
        let keys: Vec<&ColumnMetadata> = metadata.key_columns().collect();
        let computed: Vec<&ColumnMetadata> = metadata.computed_columns().collect();

        let sql = builder::build_update(
            self.dialect(),
            &metadata.table_name,
            &names(&set),
            &names(&keys),
            &names(&computed),
            builder::set_param_name,
            builder::key_param_name,
        );
        let mut command = Command::new(sql);
        for (i, column) in set.iter().enumerate() {
            binder::bind(
                &mut command,
                builder::set_param_name(i),
                entity.value(&column.member),
                column.declared,
            );
        }
        for (i, column) in keys.iter().enumerate() {
            binder::bind(
                &mut command,
                builder::key_param_name(i),
                entity.value(&column.member),
                column.declared,
            );
        }

        if computed.is_empty() {
            return self
                .context
                .execute(op, &metadata.entity_name, &command, cancel)
                .await;
        }

        let rows = self
            .context
            .fetch(op, &metadata.entity_name, &command, cancel)
            .await?;
        if let Some(row) = rows.first() {
            metadata::apply_echo(&metadata, entity, row, &computed, op)?;
        }
        Ok(rows.len() as u64)
    }

    /// Update many entities in one CASE-batched statement
    pub async fn update_bulk(
        &self,
        entities: &mut [T],
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        match entities {
            [] => return Ok(0),
            [single] => return self.update(single, columns, cancel).await,
            _ => {}
        }

        let op = RepositoryOperation::UpdateBulk;
        let metadata = self.metadata(op)?;
        let set = select_columns(&metadata, columns, op)?;
        let keys: Vec<&ColumnMetadata> = metadata.key_columns().collect();
        let computed: Vec<&ColumnMetadata> = metadata.computed_columns().collect();

        let echo: Vec<&ColumnMetadata> = if computed.is_empty() {
            Vec::new()
        } else {
            let mut echo = keys.clone();
            echo.extend(computed.iter().filter(|c| !c.is_key));
            echo
        };
        let sql = builder::build_bulk_update(
            self.dialect(),
            &metadata.table_name,
            &names(&set),
            &names(&keys),
            &names(&echo),
            entities.len(),
            builder::bulk_set_param_name,
            builder::bulk_key_param_name,
            builder::bulk_where_param_name,
        );
        let mut command = Command::new(sql);
        for (row, entity) in entities.iter().enumerate() {
            for (k, column) in keys.iter().enumerate() {
                binder::bind(
                    &mut command,
                    builder::bulk_key_param_name(k, row),
                    entity.value(&column.member),
                    column.declared,
                );
            }
            for (c, column) in set.iter().enumerate() {
                binder::bind(
                    &mut command,
                    builder::bulk_set_param_name(c, row),
                    entity.value(&column.member),
                    column.declared,
                );
            }
            for (k, column) in keys.iter().enumerate() {
                binder::bind(
                    &mut command,
                    builder::bulk_where_param_name(k, row),
                    entity.value(&column.member),
                    column.declared,
                );
            }
        }

        tracing::debug!(
            entity = %metadata.entity_name,
            rows = entities.len(),
            columns = set.len(),
            "Bulk update"
        );

        if echo.is_empty() {
            return self
                .context
                .execute(op, &metadata.entity_name, &command, cancel)
                .await;
        }

        let rows = self
            .context
            .fetch(op, &metadata.entity_name, &command, cancel)
            .await?;
        for (row, index) in correlate(entities, &rows, &keys, false) {
            metadata::apply_echo(&metadata, &mut entities[index], &rows[row], &computed, op)?;
        }
        Ok(rows.len() as u64)
    }

    /// Delete one entity by key
    pub async fn delete(&self, entity: &T, cancel: &CancellationToken) -> RepositoryResult<u64> {
        let op = RepositoryOperation::Delete;
        let metadata = self.metadata(op)?;
        let keys: Vec<&ColumnMetadata> = metadata.key_columns().collect();

        let mut command = Command::new(builder::build_delete(
            self.dialect(),
            &metadata.table_name,
            &names(&keys),
            builder::key_param_name,
        ));
        for (i, column) in keys.iter().enumerate() {
            binder::bind(
                &mut command,
                builder::key_param_name(i),
                entity.value(&column.member),
                column.declared,
            );
        }
        self.context
            .execute(op, &metadata.entity_name, &command, cancel)
            .await
    }

    /// Delete many entities in one statement
    pub async fn delete_bulk(
        &self,
        entities: &[T],
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        match entities {
            [] => return Ok(0),
            [single] => return self.delete(single, cancel).await,
            _ => {}
        }

        let op = RepositoryOperation::DeleteBulk;
        let metadata = self.metadata(op)?;
        let keys: Vec<&ColumnMetadata> = metadata.key_columns().collect();

        let mut command = Command::new(builder::build_bulk_delete(
            self.dialect(),
            &metadata.table_name,
            &names(&keys),
            entities.len(),
            builder::bulk_key_param_name,
        ));
        for (row, entity) in entities.iter().enumerate() {
            for (k, column) in keys.iter().enumerate() {
                binder::bind(
                    &mut command,
                    builder::bulk_key_param_name(k, row),
                    entity.value(&column.member),
                    column.declared,
                );
            }
        }
        self.context
            .execute(op, &metadata.entity_name, &command, cancel)
            .await
    }

    /// Start a query plan over the mapped table
    pub fn query(&self) -> Query<T, T, F> {
        Query::new(Arc::clone(&self.context))
    }

    /// Point lookup by single-column key
    ///
    /// Shorthand for `query().filter(col(key).eq(value)).first_or_default()`.
    pub async fn find(
        &self,
        key: impl Into<Value>,
        cancel: &CancellationToken,
    ) -> OptionalResult<T> {
        let key_member = match self.single_key() {
            Ok(member) => member,
            Err(e) => return OptionalResult::Error(e.to_string()),
        };
        let key: Value = key.into();
        self.query()
            .filter(col(&key_member).eq(key))
            .first_or_default(cancel)
            .await
            .into()
    }

    fn single_key(&self) -> RepositoryResult<String> {
        let metadata = self.metadata(RepositoryOperation::Query)?;
        let mut keys = metadata.key_columns();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key.member.clone()),
            _ => Err(RepositoryError::configuration(
                "Point lookup requires a single-column key",
            )
            .with_operation(RepositoryOperation::Query)
            .with_entity(&metadata.entity_name)),
        }
    }
}

fn names<'a>(columns: &[&'a ColumnMetadata]) -> Vec<&'a str> {
    columns.iter().map(|c| c.column_name.as_str()).collect()
}

/// Resolve an update selector to columns, rejecting keys, computed and
/// unknown members
fn select_columns<'m>(
    metadata: &'m EntityMetadata,
    selector: Option<&[&str]>,
    operation: RepositoryOperation,
) -> RepositoryResult<Vec<&'m ColumnMetadata>> {
    let reject = |message: String| {
        RepositoryError::invalid_query(message)
            .with_operation(operation)
            .with_entity(&metadata.entity_name)
    };

    let selected: Vec<&ColumnMetadata> = match selector {
        None => metadata.updatable_columns().collect(),
        Some(members) => {
            let mut selected: Vec<&ColumnMetadata> = Vec::with_capacity(members.len());
            for member in members {
                let column = metadata
                    .column(member)
                    .ok_or_else(|| reject(format!("Unknown member '{member}'")))?;
                if column.is_key || column.is_computed {
                    return Err(reject(format!(
                        "Member '{member}' is a key or computed column"
                    )));
                }
                if !selected.iter().any(|c| c.member == column.member) {
                    selected.push(column);
                }
            }
            selected
        }
    };

    if selected.is_empty() {
        return Err(reject("No columns to update".to_string()));
    }
    Ok(selected)
}

/// Pair echoed rows with entities as `(row, entity)` indices
///
/// A row is matched to the first unclaimed entity whose `columns` hold the
/// same values. With `positional`, rows left unmatched take the entity at
/// their own index, or the next unclaimed one.
fn correlate<T: Entity>(
    entities: &[T],
    rows: &[Row],
    columns: &[&ColumnMetadata],
    positional: bool,
) -> Vec<(usize, usize)> {
    let mut claimed = vec![false; entities.len()];
    let mut matched: Vec<Option<usize>> = vec![None; rows.len()];

    for (r, row) in rows.iter().enumerate() {
        let hit = (0..entities.len())
            .find(|&e| !claimed[e] && same_values(&entities[e], row, columns));
        if let Some(e) = hit {
            claimed[e] = true;
            matched[r] = Some(e);
        }
    }

    let mut pairs = Vec::with_capacity(rows.len());
    for (r, hit) in matched.into_iter().enumerate() {
        let index = match hit {
            Some(e) => Some(e),
            None if positional => {
                if r < claimed.len() && !claimed[r] {
                    Some(r)
                } else {
                    claimed.iter().position(|c| !c)
                }
            }
            None => None,
        };
        if let Some(e) = index {
            claimed[e] = true;
            pairs.push((r, e));
        }
    }
    pairs
}

fn same_values<T: Entity>(entity: &T, row: &Row, columns: &[&ColumnMetadata]) -> bool {
    columns.iter().all(|column| {
        let expected = binder::normalize(entity.value(&column.member), column.declared.ty);
        binder::read(row, column.column_name.as_str(), column.declared)
            .map(|actual| equivalent(&actual, &expected))
            .unwrap_or(false)
    })
}

/// Equality that tolerates floats stored at single precision
fn equivalent(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Float(a), Value::Float(b)) => {
            a == b || (a - b).abs() <= f64::from(f32::EPSILON) * a.abs().max(b.abs())
        }
        _ => actual == expected,
    }
}
