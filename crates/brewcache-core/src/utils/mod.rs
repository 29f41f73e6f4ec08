//! Utility functions for identifier generation.

pub mod id;

pub use id::{equipment_id, method_id, random_token, record_id};
