pub mod legacy_config;
pub mod manager;
pub mod migrate;
pub mod model;
pub mod safe_fs;

pub use manager::InstanceStore;
pub use migrate::MigrationReport;
pub use model::{InstanceShape, LatestInstanceInfo, LegacyFolder};
