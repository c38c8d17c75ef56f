pub mod analysis;
pub mod cache;
pub mod clock;
pub mod config;
pub mod cost;
pub mod db;
pub mod engine;
pub mod errors;
pub mod key;
pub mod models;
