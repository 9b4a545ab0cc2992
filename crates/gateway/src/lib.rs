//! ModelMux gateway: HTTP surface, request pipeline, and wiring.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod search;
pub mod state;
