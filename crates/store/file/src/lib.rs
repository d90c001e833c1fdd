//! JSON-file backed [`weft_store::KeyValueStore`].
//!
//! The whole map lives in one file and is rewritten atomically (write to a
//! sibling temp file, then rename) on every mutation. Another process
//! writing the same file is picked up by [`FileStore::reload`], which
//! broadcasts a change for every key that differs.

mod store;

pub use store::FileStore;
