//! Relay Server
//!
//! Runs one messaging session per account and republishes every session
//! event to the account's webhook with bounded retries.

pub mod api;
pub mod config;
pub mod connection;
pub mod db;
pub mod registry;
pub mod session;
pub mod webhooks;

#[cfg(test)]
mod testing;
