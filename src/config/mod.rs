mod loader;
mod paths;
mod types;

pub use paths::{default_config_path, default_syncthing_path};
pub use types::{ManagerConfig, ProcessPriority};
