pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod scheduler;
pub mod utils;
pub mod web;
