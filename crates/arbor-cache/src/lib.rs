//! Page cache for Arbor tree files.
//!
//! This crate provides typed page caching with:
//! - Scoped pins: a page is reachable only through a `PinnedPage` guard
//! - Per-page-kind fetch/flush callbacks via the `CachePage` trait
//! - Size accounting from each page's serialized-size estimate
//! - Clock eviction of unpinned pages with dirty write-back

mod file;
mod frame;
mod replacer;
mod table;

pub use file::{CacheFile, CacheFileId};
pub use frame::{CachePage, PageKey};
pub use replacer::{ClockReplacer, Replacer};
pub use table::{CacheStats, CacheTable, PinnedPage};
