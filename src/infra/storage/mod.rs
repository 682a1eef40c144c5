// The in-memory backend only ever backs tests; production wires SQLite.
#[allow(dead_code)]
pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::MemoryKvStore;
pub use sqlite_store::SqliteKvStore;
