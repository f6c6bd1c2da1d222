//! Entity metadata resolution
//!
//! Every persisted type implements [`Entity`], describing its table and
//! columns once through [`Entity::describe`]. [`EntityMetadata::resolve`]
//! validates that description and caches the result per type for the
//! lifetime of the process, so statement building never re-inspects the
//! entity.
//!
//! # Example
//!
//! ```rust
//! use reservation_data::metadata::{ColumnDef, Entity, EntityDescriptor, EntityMetadata};
//! use reservation_data::repository::RepositoryResult;
//! use reservation_data::value::{DeclaredType, Value, ValueType};
//!
//! #[derive(Debug, Default)]
//! struct Station {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Station {
//!     fn describe() -> EntityDescriptor {
//!         EntityDescriptor::new("Stations")
//!             .column(ColumnDef::new("id", DeclaredType::required(ValueType::Int)).key().computed())
//!             .column(ColumnDef::new("name", DeclaredType::required(ValueType::Text)))
//!     }
//!
//!     fn value(&self, member: &str) -> Value {
//!         match member {
//!             "id" => self.id.into(),
//!             "name" => self.name.as_str().into(),
//!             _ => Value::Null,
//!         }
//!     }
//!
//!     fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()> {
//!         match member {
//!             "id" => reservation_data::metadata::assign(&mut self.id, member, value),
//!             "name" => reservation_data::metadata::assign(&mut self.name, member, value),
//!             other => Err(reservation_data::metadata::unknown_member::<Self>(other)),
//!         }
//!     }
//! }
//!
//! let metadata = EntityMetadata::resolve::<Station>().unwrap();
//! assert_eq!(metadata.table_name, "Stations");
//! assert_eq!(metadata.key_columns().count(), 1);
//! assert_eq!(metadata.writable_columns().count(), 1);
//! ```

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::binder::{self, Row};
use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};
use crate::value::{DeclaredType, FromValue, Value};

static METADATA_CACHE: Lazy<DashMap<TypeId, Arc<EntityMetadata>>> = Lazy::new(DashMap::new);

/// A persisted record type
///
/// Implementations map member names onto values and back. Member names are
/// the names used in [`ColumnDef::new`] and in query expressions.
pub trait Entity: Default + Send + Sync + 'static {
    /// Table and column description for this type
    fn describe() -> EntityDescriptor;

    /// Current value of a member
    fn value(&self, member: &str) -> Value;

    /// Assign a value read from the store to a member
    fn set_value(&mut self, member: &str, value: Value) -> RepositoryResult<()>;
}

/// Declarative description of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    member: &'static str,
    column: Option<&'static str>,
    key: bool,
    computed: bool,
    declared: DeclaredType,
}

impl ColumnDef {
    /// A plain writable column whose name matches the member
    pub const fn new(member: &'static str, declared: DeclaredType) -> Self {
        Self {
            member,
            column: None,
            key: false,
            computed: false,
            declared,
        }
    }

    /// Mark the column as part of the primary key
    #[must_use]
    pub const fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark the column as generated by the store
    #[must_use]
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Override the column name
    #[must_use]
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column = Some(name);
        self
    }
}

/// Table name plus ordered column definitions, produced by [`Entity::describe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    table: &'static str,
    columns: Vec<ColumnDef>,
}

impl EntityDescriptor {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }
}

/// Resolved column mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub member: String,
    pub column_name: String,
    pub is_key: bool,
    pub is_computed: bool,
    pub declared: DeclaredType,
}

/// Validated, cached mapping between an entity type and its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub entity_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl EntityMetadata {
    /// Resolve and cache the metadata for `T`
    ///
    /// Concurrent first calls may each build the metadata; exactly one
    /// result is kept and returned to every caller.
    pub fn resolve<T: Entity>() -> RepositoryResult<Arc<EntityMetadata>> {
        let id = TypeId::of::<T>();
        if let Some(cached) = METADATA_CACHE.get(&id) {
            return Ok(Arc::clone(cached.value()));
        }

        let built = Arc::new(Self::from_descriptor(entity_name::<T>(), T::describe())?);
        tracing::debug!(
            entity = %built.entity_name,
            table = %built.table_name,
            columns = built.columns.len(),
            "Resolved entity metadata"
        );
        let entry = METADATA_CACHE.entry(id).or_insert(built);
        Ok(Arc::clone(entry.value()))
    }

    /// Validate a descriptor into metadata
    pub fn from_descriptor(
        entity_name: impl Into<String>,
        descriptor: EntityDescriptor,
    ) -> RepositoryResult<Self> {
        let entity_name = entity_name.into();
        if descriptor.table.trim().is_empty() {
            return Err(RepositoryError::configuration(format!(
                "Entity {entity_name} has no table name"
            ))
            .with_entity(entity_name));
        }

        let mut members = HashSet::new();
        let mut names = HashSet::new();
        let mut columns = Vec::with_capacity(descriptor.columns.len());
        for def in descriptor.columns {
            let column_name = def.column.unwrap_or(def.member);
            if !members.insert(def.member) {
                return Err(RepositoryError::configuration(format!(
                    "Member '{}' is declared twice",
                    def.member
                ))
                .with_entity(entity_name));
            }
            if !names.insert(column_name.to_ascii_lowercase()) {
                return Err(RepositoryError::configuration(format!(
                    "Column '{column_name}' is mapped twice"
                ))
                .with_entity(entity_name));
            }
            columns.push(ColumnMetadata {
                member: def.member.to_string(),
                column_name: column_name.to_string(),
                is_key: def.key,
                is_computed: def.computed,
                declared: def.declared,
            });
        }

        if !columns.iter().any(|c| c.is_key) {
            return Err(RepositoryError::configuration(format!(
                "Entity {entity_name} declares no key column"
            ))
            .with_entity(entity_name));
        }

        Ok(Self {
            entity_name,
            table_name: descriptor.table.to_string(),
            columns,
        })
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_key)
    }

    pub fn computed_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_computed)
    }

    /// Columns written by INSERT
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| !c.is_computed)
    }

    /// Columns written by UPDATE
    pub fn updatable_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| !c.is_key && !c.is_computed)
    }

    pub fn column(&self, member: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.member == member)
    }

    pub fn column_name(&self, member: &str) -> Option<&str> {
        self.column(member).map(|c| c.column_name.as_str())
    }

    pub fn has_computed_columns(&self) -> bool {
        self.columns.iter().any(|c| c.is_computed)
    }
}

/// Build an entity from a row whose columns follow metadata order
pub fn materialize<T: Entity>(
    metadata: &EntityMetadata,
    row: &Row,
    operation: RepositoryOperation,
) -> RepositoryResult<T> {
    let mut entity = T::default();
    for (ordinal, column) in metadata.columns.iter().enumerate() {
        let value = binder::read(row, ordinal, column.declared)
            .map_err(|e| e.with_operation(operation).with_entity(&metadata.entity_name))?;
        entity
            .set_value(&column.member, value)
            .map_err(|e| e.with_operation(operation))?;
    }
    Ok(entity)
}

/// Copy named columns of an echoed row back onto an entity
pub fn apply_echo<T: Entity>(
    metadata: &EntityMetadata,
    entity: &mut T,
    row: &Row,
    columns: &[&ColumnMetadata],
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    for column in columns {
        let value = binder::read(row, column.column_name.as_str(), column.declared)
            .map_err(|e| e.with_operation(operation).with_entity(&metadata.entity_name))?;
        entity
            .set_value(&column.member, value)
            .map_err(|e| e.with_operation(operation))?;
    }
    Ok(())
}

/// Helper for [`Entity::set_value`] implementations
pub fn assign<V: FromValue>(slot: &mut V, member: &str, value: Value) -> RepositoryResult<()> {
    *slot = V::from_value(value).map_err(|e| {
        RepositoryError::mapping(
            RepositoryOperation::Query,
            format!("Cannot assign member '{member}': {e}"),
        )
    })?;
    Ok(())
}

/// Error for [`Entity::set_value`] called with a member the type does not have
pub fn unknown_member<T: Entity>(member: &str) -> RepositoryError {
    RepositoryError::mapping(
        RepositoryOperation::Query,
        format!("Unknown member '{member}'"),
    )
    .with_entity(entity_name::<T>())
}

/// Short type name used in logs and errors
pub fn entity_name<T: 'static>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
