pub mod api;
pub mod config;
pub mod manager;
pub mod mock;

pub use api::{HttpSessionApi, SessionApi};
pub use config::SessionConfig;
pub use manager::{LifecycleState, SessionManager};
pub use mock::MockSessionApi;
