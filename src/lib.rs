pub mod ai;
pub mod cancel;
pub mod config;
pub mod embedding;
pub mod entry;
pub mod error;
pub mod index;
pub mod pile;
pub mod preview;
pub mod search;
pub mod store;
pub mod thread;
pub mod vector;

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod thread_scenario_test;



pub use cancel::CancelFlag;
pub use entry::types::{Entry, EntryMetadata, EntryPatch};
pub use error::{PileError, Result};
pub use index::{EntryOrder, IndexEvent, IndexStore, LoadReport};
pub use pile::{EntryDraft, Pile};
pub use store::{EntryStore, FsStore};
