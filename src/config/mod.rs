//! TOML configuration surface.

pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str};
pub use schema::Config;
