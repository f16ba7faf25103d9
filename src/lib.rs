pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod persistence;
pub mod scheduler;
pub mod server;
pub mod shutdown;
