//! # Buffer Pool
//!
//! An in-memory cache of SSTable pages shared by every reader of one
//! database. Pages are identified by [`PageId`] (`sst_id`, `page_no`) and
//! loaded on demand through a caller-supplied closure, so the pool never
//! touches files itself.
//!
//! ## Structure
//!
//! ```text
//!   get_page(id, load)
//!        │
//!        ▼
//!   ExtendibleHashtable<PageId, frame> ──hit──▶ frames[frame] ─▶ Arc<Page>
//!        │ miss                                   ▲
//!        ▼                                        │
//!   load() ─▶ full? ─▶ EvictionPolicy::get_page_to_evict ─▶ reuse frame
//! ```
//!
//! The directory index and the eviction policy always describe the same set
//! of resident pages. Capacity is counted in pages, never in bytes.
//!
//! Two replacement strategies are available, selected with
//! [`config::EvictionPolicyType`]: [`LruPolicy`] and second-chance
//! [`ClockPolicy`].

mod page;
mod policy;
mod pool;

pub use page::{Page, PageId};
pub use policy::{ClockPolicy, EvictionPolicy, LruPolicy};
pub use pool::{BufferPool, BufferPoolStats};

#[cfg(test)]
mod tests;
