//! Domain models for code-signing reconciliation.

pub mod assets;
pub mod certificate;
pub mod distribution;
pub mod resources;

pub use assets::*;
pub use certificate::*;
pub use distribution::*;
pub use resources::*;
