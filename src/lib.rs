pub mod cloudflare;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod server;
pub mod service;
pub mod state;

#[cfg(test)]
mod testing;
