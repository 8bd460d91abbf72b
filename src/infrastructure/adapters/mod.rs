//! User-facing adapters

pub mod console;
