//! Session persistence: capped turn history plus the latest state snapshot.

mod compaction;
mod file;
mod locks;
mod memory;
mod store;
mod types;

pub use compaction::{COMPACTED_TRACE, CompactionOutcome, CompactionPolicy};
pub use file::{JsonFileSessionStore, validate_session_id};
pub use locks::{SessionGuard, SessionLocks};
pub use memory::MemorySessionStore;
pub use store::SessionStore;
pub use types::{
    CompactionInfo, ConversationTurn, CustomerInfo, ErrorMarker, SessionInfo, SessionRecord,
};
