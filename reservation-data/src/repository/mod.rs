//! Generic repositories over metadata-described entities
//!
//! This module is the surface the service layer calls:
//!
//! - **CRUD**: [`GenericRepository`] (and the [`Repository`] trait it
//!   implements) for single and bulk create, update and delete with
//!   generated-value echo-back
//! - **Queries**: [`GenericRepository::query`] opens a lazily compiled
//!   [`Query`](crate::query::Query) plan
//! - **Errors**: [`RepositoryError`] with a [`RepositoryErrorKind`] per
//!   failure category, translated from native driver codes by [`classify`]
//! - **Outcomes**: [`OptionalResult`], [`OperationResult`] and
//!   [`AggregateResult`] for expected found/empty/failed results
//!
//! # Example
//!
//! ```rust,ignore
//! use reservation_data::prelude::*;
//!
//! let stations = GenericRepository::<Station, _>::new(factory);
//! let cancel = CancellationToken::new();
//!
//! let mut retiro = Station::new("Retiro", Some("Buenos Aires"));
//! match stations.create(&mut retiro, &cancel).await {
//!     Ok(_) => println!("created station {}", retiro.id),
//!     Err(e) if e.kind == RepositoryErrorKind::UniqueConstraintViolation => {
//!         println!("name taken ({:?})", e.constraint)
//!     }
//!     Err(e) if e.is_retriable() => { /* back off and retry */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

mod classify;
mod context;
mod error;
mod generic;
mod result;
mod traits;

pub use classify::classify;
pub use context::{DataContext, RepositoryOptions};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult};
pub use generic::GenericRepository;
pub use result::{AggregateResult, OperationResult, OptionalResult};
pub use traits::Repository;
