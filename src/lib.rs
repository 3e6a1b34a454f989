pub mod admission;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod endpoint;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod health;
pub mod keys;
pub mod memory_store;
pub mod middleware;
pub mod redis_store;
pub mod server;
pub mod store;

pub use admission::{Admission, AdmissionController, AdmissionSettings, AdmissionToken, Rejection};
pub use config::{Config, StoreConnectionParams};
pub use endpoint::{Endpoint, EndpointSet, QuotaBoundary};
pub use error::{ThrottlerError, ThrottlerResult};
pub use fetcher::{fetch_resource, PostFetcher};
pub use memory_store::InMemoryStore;
pub use redis_store::RedisStore;
pub use server::create_app;
pub use store::CoordinationStore;
