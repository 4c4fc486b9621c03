//! Insertion-ordered and unordered key-value maps with a shared byte-budget
//! eviction policy and a versioned binary persistence format.
//!
//! Two container types:
//! - [`OrderedMap`] — hash lookup plus O(1) insertion-order traversal.
//! - [`SyncMap`] — plain hash map under the same locking and eviction
//!   contract, without the ordering.
//!
//! Both are guarded by a single structure-wide reader/writer lock, track an
//! approximate byte total against an optional ceiling (a write that would
//! exceed it clears the whole structure first), and can save/load
//! themselves to a magic-tagged, versioned, optionally gzip-compressed
//! file — synchronously, or on a background worker thread with a coarse
//! progress handle.
//!
//! Keys and values participate through two capabilities: [`ByteSize`] for
//! the eviction budget and [`Codec`] for the file format. Both are
//! implemented for the usual scalars, `String`, and `Vec<u8>`; arbitrary
//! serde types go through the [`Json`] wrapper.

pub mod codec;
pub mod error;
pub mod list;
pub mod map;
pub mod persist;
pub mod size;
pub mod sync_map;


pub use codec::{Codec, Json, FORMAT_VERSION, MAX_PAYLOAD_LEN, STORE_MAGIC};
pub use error::{FormatError, StoreError, StoreResult};
pub use list::{NodeId, OrderedList};
pub use map::OrderedMap;
pub use persist::{PersistTask, SaveOptions, GZIP_MAGIC};
pub use size::ByteSize;
pub use sync_map::SyncMap;
