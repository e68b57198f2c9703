// src/utils/mod.rs
pub mod precision;
pub mod retry;
