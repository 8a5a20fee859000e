//! In-memory mirrors of the daemon's folders and devices.
//!
//! Each collection is an `Arc<HashMap>` replaced as a whole under a
//! short write lock; readers clone the `Arc` and so always see a single
//! generation. Entries carry their own lock for incremental updates.

mod devices;
mod folders;

pub use devices::{Device, DeviceManager, DeviceSnapshot};
pub use folders::{Folder, FolderError, FolderIgnores, FolderManager, FolderSnapshot};
