//! Data models shared across the pipeline.

pub mod catalog;
pub mod config;
pub mod inventory;
pub mod invoice;
