//! # blobcache
//!
//! A reference-counted, alignment-aware, block-granular cache over opaque
//! byte sources. It maps a caller-identified *source* (a file, an in-memory
//! buffer, an object living inside a host VM — anything that implements
//! [`methods::SourceMethods`]) to a set of cached, overlapping byte ranges
//! ("blocks"), and serves requests for contiguous, aligned byte ranges
//! ("frames") out of them, fetching more of the source only when the
//! existing blocks can't already satisfy the request.
//!
//! It was built for exactly one shape of caller: a font-rendering pipeline
//! that repeatedly asks for small, oddly-aligned slices of font program
//! data and expects the second ask for the same bytes to be free.
//!
//! ```text
//!                     ┌─────────────┐
//!                     │  BlobCache  │  (entries: Vec<EntryRef>, MRU order)
//!                     └──────┬──────┘
//!                            │ owns
//!                     ┌──────▼──────┐
//!                     │  BlobData   │  one per distinct source identity
//!                     │  (entry)    │  blocks: Vec<Block>, sorted
//!                     └──────┬──────┘
//!                            │ owns
//!                     ┌──────▼──────┐
//!                     │    Block    │  one allocation, aligned payload
//!                     └─────────────┘
//!
//!  BlobHandle ──(create/open/close)──► BlobData
//!       │
//!       └─ MapHandle ──(map_region)──► Frame Engine ──► Frame { ptr, len }
//! ```
//!
//! ## Quick start
//!
//! ```
//! use blobcache::cache::BlobCache;
//! use blobcache::demo_source::MemorySource;
//! use blobcache::handle::BlobHandle;
//! use blobcache::mode::ModeFlags;
//!
//! let cache = BlobCache::init("fonts", 1 << 24, 64, 4096, 8);
//! let (source, methods) = MemorySource::new(b"glyph program bytes".to_vec());
//! let handle = BlobHandle::create(&cache, &source, methods, ModeFlags::RDONLY).unwrap();
//!
//! let map = handle.map_open();
//! let frame = map.map_region(0, 5, 4).unwrap();
//! assert_eq!(frame.as_slice(), b"glyph");
//! map.close();
//! handle.close();
//! ```
//!
//! ## Concurrency
//!
//! This crate is single-threaded and cooperative: a cache's internals are
//! `Rc`/`RefCell`, not `Arc`/`Mutex`. Nothing here is `Send` or `Sync`. Each
//! cache advertises a thread-safety declaration via
//! [`lowmem::LowMemHandlerRegistration::mt_safe`] for the host's
//! low-memory dispatcher to respect, but the crate does not enforce
//! cross-thread exclusion itself — see the module docs on `cache` and
//! `handle` for the ordering guarantees callers must uphold instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod cache;
pub mod demo_source;
pub mod entry;
pub mod error;
pub mod frame;
pub mod gc;
pub mod handle;
pub mod lowmem;
pub mod methods;
pub mod mode;
pub mod purge;
pub mod registry;
pub mod restore;

pub use block::BLOB_MAX_ALIGNMENT;
pub use cache::BlobCache;
pub use error::{BlobError, BlobResult};
pub use frame::Frame;
pub use handle::{BlobHandle, MapHandle, SeekFrom};
pub use methods::{AvailableData, Protection, SourceIdentity, SourceMethods};
pub use mode::ModeFlags;

/// Crate version, re-exported for callers that want to log or assert it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
