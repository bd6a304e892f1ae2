// Business logic services
// Filter engine, transform pipeline, persistence and webhook lifecycle.

pub mod filter;
pub mod ingestion;
pub mod persistence;
pub mod registrar;
pub mod transform;

pub use ingestion::IngestionHandler;
pub use persistence::{PersistenceGateway, StorageError};
pub use registrar::{Registrar, RegistrarError};
pub use transform::TransformError;
