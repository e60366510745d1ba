//! Shared types for Herald

mod error;

pub use error::{HeraldError, Result};
