pub mod database;
pub mod error;
pub mod kv;
pub mod schema;
pub mod state;

pub use database::Database;
pub use error::StoreError;
pub use kv::{keys, KvStore};
pub use state::ClientStateRepo;
