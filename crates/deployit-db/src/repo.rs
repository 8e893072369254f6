//! Store implementations.

pub mod status;
pub mod versions;

pub use status::PgStatusStore;
pub use versions::PgVersionStore;
