pub mod config;
pub mod connection;
pub mod router;

#[cfg(test)]
mod test_support;

pub use config::{feedback_url, ConnectionConfig};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, OnConnect};
pub use router::{FeedbackEvent, MessageRouter};
