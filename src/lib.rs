//! mq-post-relay
//!
//! Fans GitHub webhook payloads out of a message broker to HTTP endpoints.
//! Each configured routing key gets its own queue, consumer and target URL,
//! supervised independently.

pub mod broker;
pub mod config;
pub mod forward;
pub mod relay;
pub mod test_utils;
pub mod utils;
