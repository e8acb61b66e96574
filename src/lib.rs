pub mod api;
pub mod config;
pub mod models;
pub mod security;
pub mod services;
pub mod storage;
