pub mod error;
pub mod registration;

pub use error::{Error, PartialCommit, Result};
pub use registration::{ReenrollmentIntent, fields};
