pub mod args;
pub mod hooks;
pub mod platform;
pub mod readiness;
pub mod session;

pub use hooks::{GameSession, NoopHooks, SessionHooks, SkinBackupHooks};
pub use platform::{current_platform, platform_arch, LaunchSpec, PlatformStrategy, PRODUCT_NAME};
pub use session::{LaunchOutcome, SessionOrchestrator, READY_TIMEOUT};
