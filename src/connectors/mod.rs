// src/connectors/mod.rs
pub mod bybit;
pub mod messages;
pub mod paper;
pub mod traits;
