pub mod config;
pub mod docker;
