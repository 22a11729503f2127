pub mod model;
pub mod paths;
pub mod store;

pub use model::{is_placeholder_nick, parse_uuid, Config, DEFAULT_NICK, PLACEHOLDER_NICKS};
pub use paths::AppPaths;
pub use store::ConfigStore;
