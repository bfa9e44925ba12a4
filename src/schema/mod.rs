//! Recorded session schema
//!
//! The replay input format (`persona.session.v1`).

mod reader;
mod session;

pub use reader::{SessionReader, ValidationResult};
pub use session::*;
