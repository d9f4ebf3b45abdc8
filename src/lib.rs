pub mod agents;
pub mod channel;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
pub mod phase;
pub mod producer;
pub mod server;
pub mod signals;
pub mod stream;
