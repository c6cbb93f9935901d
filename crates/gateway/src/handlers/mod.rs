//! API handlers module

pub mod auth;
pub mod chat;
pub mod database;
pub mod health;
