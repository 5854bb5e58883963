pub mod connection;
pub mod models;
pub mod service;

pub use connection::{get_connection, open_in_memory, DbPool};
pub use models::*;
