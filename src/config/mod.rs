//! The materialised configuration model and a thin YAML loader for it.
//!
//! See [`model`] for the schema the core consumes and
//! [`loader`] for the convenience loader used by the CLI and tests.

pub mod loader;
pub mod model;

pub use loader::{load_from_path, load_from_str};
pub use model::*;
