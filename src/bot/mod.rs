pub mod commands;
pub mod control;
pub mod run_loop;
pub mod state;

pub use commands::Command;
pub use control::{ControlSurface, PersonaOutcome, PostOutcome, StartOutcome, StopOutcome};
pub use run_loop::{LoopSettings, SessionDeps};
pub use state::{RunState, SharedState};
