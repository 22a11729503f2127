pub mod manifest;
pub mod runtime;
pub mod shim;

pub use manifest::{RuntimeManifest, RUNTIME_MANIFEST_URL, RUNTIME_VERSION};
pub use runtime::{RuntimeError, RuntimeProvisioner, VERSION_MARKER};
