//! Repository trait definitions
//!
//! [`Repository`] is the CRUD surface the service layer codes against. It
//! uses RPITIT (Return Position Impl Trait In Traits) so implementations can
//! be plain `async fn`s without `async_trait` boxing.
//!
//! # Example
//!
//! ```rust,ignore
//! use reservation_data::repository::{Repository, RepositoryResult};
//!
//! async fn rename<R: Repository<Station>>(
//!     repo: &R,
//!     station: &mut Station,
//!     cancel: &CancellationToken,
//! ) -> RepositoryResult<bool> {
//!     station.name = station.name.trim().to_string();
//!     Ok(repo.update(station, Some(&["name"]), cancel).await? == 1)
//! }
//! ```

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::backend::ConnectionFactory;
use crate::metadata::Entity;

use super::{GenericRepository, RepositoryResult};

/// CRUD operations over one entity type
///
/// Counts are affected-row counts as reported by the store. Bulk operations
/// return `0` for an empty slice without touching the store.
pub trait Repository<T: Entity>: Send + Sync {
    /// Every row of the mapped table
    fn get_all(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Insert one entity
    ///
    /// Computed columns are written back onto `entity`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut retiro = Station::new("Retiro", Some("Buenos Aires"));
    /// repo.create(&mut retiro, &cancel).await?;
    /// assert_ne!(retiro.id, 0);
    /// ```
    fn create(
        &self,
        entity: &mut T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Insert many entities in one round trip
    fn create_bulk(
        &self,
        entities: &mut [T],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Update one entity by key
    ///
    /// With `columns`, only the named members are written. A result of `0`
    /// means no row carries the entity's key.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// station.city = Some("Rosario".into());
    /// let affected = repo.update(&mut station, Some(&["city"]), &cancel).await?;
    /// if affected == 0 {
    ///     // gone
    /// }
    /// ```
    fn update(
        &self,
        entity: &mut T,
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Update many entities in one round trip
    fn update_bulk(
        &self,
        entities: &mut [T],
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Delete one entity by key
    fn delete(
        &self,
        entity: &T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Delete many entities in one round trip
    fn delete_bulk(
        &self,
        entities: &[T],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

impl<T: Entity, F: ConnectionFactory> Repository<T> for GenericRepository<T, F> {
    fn get_all(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send {
        GenericRepository::get_all(self, cancel)
    }

    fn create(
        &self,
        entity: &mut T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::create(self, entity, cancel)
    }

    fn create_bulk(
        &self,
        entities: &mut [T],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::create_bulk(self, entities, cancel)
    }

    fn update(
        &self,
        entity: &mut T,
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::update(self, entity, columns, cancel)
    }

    fn update_bulk(
        &self,
        entities: &mut [T],
        columns: Option<&[&str]>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::update_bulk(self, entities, columns, cancel)
    }

    fn delete(
        &self,
        entity: &T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::delete(self, entity, cancel)
    }

    fn delete_bulk(
        &self,
        entities: &[T],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        GenericRepository::delete_bulk(self, entities, cancel)
    }
}
