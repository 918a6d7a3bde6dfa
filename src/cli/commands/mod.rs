pub mod cache;
pub mod config;
pub mod generate;
pub mod plan;
