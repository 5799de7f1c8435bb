pub mod config;
pub mod events;
pub mod handlers;
pub mod server;
pub mod sqlite_persistence;
