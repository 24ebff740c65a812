//! Persistence layer: task documents and append-only execution logs.
//!
//! The [`repository::TaskRepository`] trait is the narrow port the engine
//! writes through; [`mongo::MongoRepository`] is the document-store
//! adaptor. Each writer role (Torc, Texam, the API, Cancel) touches a
//! disjoint set of fields, so individual atomic writes are sufficient;
//! no cross-document transactions are assumed.

pub mod config;
pub mod error;
pub mod mongo;
pub mod repository;
pub mod schema;

pub use error::DbError;
pub use repository::{ExecutorPhase, TaskFilter, TaskPage, TaskRepository};
pub use schema::TaskDocument;
