//! Shared types for mongo-boiler

pub mod error;

pub use error::{BoilerError, DriverError, Result};
