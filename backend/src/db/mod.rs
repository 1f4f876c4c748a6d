//! Persistence layer: repository traits, the in-memory backend, and the
//! document store that applies validation and normalization on every read.

pub mod repository;
pub mod store;

#[cfg(feature = "local-repo")]
pub mod local;

pub use repository::{
    FullRepository, PublicationRepository, RepositoryError, RepositoryResult, StateRepository,
    StoredDocument, WebPublication,
};
pub use store::{default_document, load_document, save_document};

#[cfg(feature = "local-repo")]
pub use local::LocalRepository;
