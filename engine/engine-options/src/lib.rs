//! Typed engine and search options.
//!
//! This crate is the options dictionary shared by the search core and its
//! host: plain structs with serde support, defaults matching the shipped
//! tuning, and range validation. Parsing a UCI `setoption` stream or a
//! config file into these structs is the host's job; the search only ever
//! sees validated values.

mod defaults;
mod structs;

pub use structs::{EngineOptions, SearchOptions};

use thiserror::Error;

/// Errors raised when an option value falls outside its permitted range.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("option {name} = {value} outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

#[cfg(test)]
mod tests;
