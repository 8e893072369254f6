//! Deployer tool version cache.
//!
//! Versions offered to users are cached per deployer kind. Lookups prefer a
//! live cached set, fall back to a live fetch from the release feed, and
//! finally to the configured defaults. Feed failures never reach callers.

mod fetcher;
mod manager;
mod required;
mod store;

pub use fetcher::{GitHubReleaseFetcher, VersionFetcher};
pub use manager::VersionCacheManager;
pub use required::{RequiredVersion, VersionOperator};
pub use store::InMemoryVersionStore;
