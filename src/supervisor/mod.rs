mod exit;
mod process;
mod tree;

pub use exit::ExitStatus;
pub use process::{LaunchHook, LaunchParams, LaunchSpec, ProcessEvent, ProcessSupervisor};
