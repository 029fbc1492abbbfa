//! Error handling module
//!
//! Error taxonomy shared by tenant resolution, mechanism selection and the
//! identity provider client.

mod error;

pub use error::{OidcError, Result};
