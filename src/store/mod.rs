//! SQLite repositories.
//!
//! Thin data-access functions over the project pool. Multi-step mutations
//! that must be atomic (chunk replacement, scene replacement) run inside a
//! single transaction here; policy lives in the pipeline modules.

pub mod chunks;
pub mod claims;
pub mod entities;
pub mod issues;
pub mod projects;
pub mod scenes;
pub mod state;

pub use chunks::*;
pub use claims::*;
pub use entities::*;
pub use issues::*;
pub use projects::*;
pub use scenes::*;
pub use state::*;
