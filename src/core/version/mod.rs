pub mod branch;
pub mod cache;
pub mod catalog;
pub mod status;

pub use branch::{normalize_version_type, Branch};
pub use cache::VersionCache;
pub use catalog::{ProbeOutcome, VersionCatalog, DEFAULT_PATCH_HOST};
pub use status::{compute_status, PendingUpdateInfo, VersionStatus};
