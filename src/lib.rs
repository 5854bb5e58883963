pub mod api;
pub mod cli;
pub mod config;
pub mod consultation;
pub mod db;
pub mod store;
pub mod triage;
