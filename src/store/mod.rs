//! Object storage: the store contract and its filesystem implementation

mod filesystem;
mod traits;

pub use filesystem::FilesystemStore;
pub use traits::{ObjectStore, StoreError, StoreObjectRequest};
