mod automation;
mod error;
mod messages;
mod storage;
#[cfg(test)]
mod test_support;
mod usage;

pub use error::StorageError;
pub use messages::{FolderCounts, UpsertOutcome};
pub use storage::Storage;
