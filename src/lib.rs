#![no_std]

//! fixpool: a fixed-capacity memory pool allocator with segregated
//! block-size classes.
//!
//! A pool is one contiguous region obtained from the OS at creation time
//! and carved into eight classes of fixed-size blocks (32 bytes to 4 KiB).
//! Free payloads are poisoned and every pool/block boundary carries a
//! sentinel marker, so buffer overflows and metadata corruption are
//! detected on the next allocation, free, or reallocation touching the
//! damaged block. Allocations that do not fit a single block coalesce
//! adjacent free blocks of one class into a run.
//!
//! # Usage
//!
//! ```ignore
//! let mut settings = fixpool::PoolSettings::default();
//! settings.num_64_bytes_blocks = 16;
//! settings.total_size = 16 * 64;
//! let pool = fixpool::Pool::create(&settings).unwrap();
//!
//! let p = pool.malloc(100);
//! assert!(!p.is_null());
//! unsafe { pool.free(p) };
//! pool.destroy();
//! ```

#[cfg(any(test, feature = "std"))]
extern crate std;

mod alloc;
mod block;
mod class;
pub mod config;
pub mod error;
mod layout;
mod macros;
mod platform;
pub mod poison;
pub mod pool;
pub mod settings;
#[cfg(feature = "stats")]
pub mod stats;
mod sync;

/// Pool alignment: every section offset and block stride inside a pool is
/// a multiple of this (two machine words, 16 bytes on 64-bit targets).
pub const ALIGN: usize = 2 * core::mem::size_of::<usize>();

pub use error::ErrorCode;
pub use pool::Pool;
pub use settings::{ErrorCallback, PoolSettings};
