pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod errors;
pub mod mail;
pub mod state;
