//! Domain models for the patient roster.

mod auth;
pub(crate) mod dates;
mod patient;
mod roster;

pub use auth::*;
pub use patient::*;
pub use roster::*;
