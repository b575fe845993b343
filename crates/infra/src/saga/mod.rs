//! Multi-step writes without a cross-row transaction.

pub mod document_creation;

pub use document_creation::{CreatedDocument, DocumentCreationSaga, NewDocument, TotalsSource};
