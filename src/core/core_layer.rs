// The core module contains all business logic.
// Each concern gets its own submodule.

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "storage/kv_store.rs"]
pub mod storage;
