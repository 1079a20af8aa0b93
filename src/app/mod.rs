mod keyboard;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use keyboard::{KeyAction, KeyboardInputHandler};
pub use orchestrator::DoorcamOrchestrator;
pub use types::{ComponentState, ShutdownReason};
