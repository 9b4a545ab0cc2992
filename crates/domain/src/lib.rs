//! Shared types for the ModelMux gateway: error taxonomy, canonical stream
//! events, the persisted conversation model, generation settings, and config.

pub mod config;
pub mod error;
pub mod message;
pub mod settings;
pub mod stream;

pub use error::{Error, Result};
