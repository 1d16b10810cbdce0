//! HTTP request handlers.

pub mod distribution;
pub mod health;
pub mod jobs;
pub mod strategies;
