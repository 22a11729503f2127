pub mod tracker;

pub use tracker::{ExitCallback, GameExit, GameProcess, ProcessTracker};
