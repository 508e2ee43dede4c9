pub mod consolidation;
pub mod decay;
pub mod filter;
pub mod store;
pub mod types;

pub use filter::MemoryFilter;
pub use store::MemoryStore;
pub use types::{Layer, Memory, MemoryDraft, MemoryId, MemoryType};
