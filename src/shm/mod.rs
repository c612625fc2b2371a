//! The mmap-backed storage engine: file layout, advisory locking, the
//! mapped region, and the bucket engine built on top of it.
pub mod bucket;
pub mod layout;
pub mod lock;
pub mod region;
