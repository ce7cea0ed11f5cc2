//! Core types, config, errors, and conversation context for Preceptor.

pub mod config;
pub mod context;
pub mod error;
pub mod types;
