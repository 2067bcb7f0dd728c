pub mod api;
pub mod config;
pub mod directions;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod state;
pub mod store;
pub mod tracker;
