//! `tally-core`: identifiers, errors and entity markers shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CounterpartyId, DocumentId, LineItemId, OwnerId};
pub use value_object::ValueObject;
