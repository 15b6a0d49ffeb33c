pub mod config;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod store;
