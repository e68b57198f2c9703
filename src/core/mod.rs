// src/core/mod.rs
pub mod balance;
pub mod gateway;
pub mod notify;
pub mod plan;
pub mod position;
pub mod reconciler;
pub mod serializer;
pub mod sizer;
pub mod validator;
