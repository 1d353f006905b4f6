//! Pool creation settings and the per-class geometry derived from them.

use crate::config::{CLASS_DATA_SIZES, DUMP_FILE_NAME_SIZE, NUM_CLASSES};
use crate::error::ErrorCode;

/// Receives `(code, message)` for every error recorded on a pool.
pub type ErrorCallback = fn(ErrorCode, &str);

/// Creation settings for a pool. Copied into the pool at creation; the
/// stored copy is immutable for the pool's lifetime.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    /// Usable pool size in bytes. Recomputed from the per-class block
    /// counts at creation; a caller-supplied mismatch is reported as
    /// [`ErrorCode::InconsistentSettings`] (the pool is still created).
    pub total_size: usize,
    /// Number of blocks with 32 usable bytes.
    pub num_32_bytes_blocks: usize,
    /// Number of blocks with 64 usable bytes.
    pub num_64_bytes_blocks: usize,
    /// Number of blocks with 128 usable bytes.
    pub num_128_bytes_blocks: usize,
    /// Number of blocks with 256 usable bytes.
    pub num_256_bytes_blocks: usize,
    /// Number of blocks with 512 usable bytes.
    pub num_512_bytes_blocks: usize,
    /// Number of blocks with 1 KiB usable bytes.
    pub num_1024_bytes_blocks: usize,
    /// Number of blocks with 2 KiB usable bytes.
    pub num_2048_bytes_blocks: usize,
    /// Number of blocks with 4 KiB usable bytes.
    pub num_4096_bytes_blocks: usize,
    /// Invoked with every error recorded on the pool.
    pub error_callback: Option<ErrorCallback>,
    /// Guard every mutating call with the pool's lock.
    pub threadsafe: bool,
    /// Verify the poison fill of whole payloads and run tails on every
    /// allocation, free, and reallocation (slower, catches one-byte
    /// overflows early).
    pub full_overflow_checks: bool,
    /// Zero-fill payloads on allocation and on in-place growth.
    pub init_allocated_memory: bool,
    /// NUL-padded UTF-8 file name; when non-empty, every recorded error
    /// appends the message and a pool hex dump to this file. The file is
    /// deleted when the pool is created.
    pub error_dump_file_name: [u8; DUMP_FILE_NAME_SIZE],
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            total_size: 0,
            num_32_bytes_blocks: 0,
            num_64_bytes_blocks: 0,
            num_128_bytes_blocks: 0,
            num_256_bytes_blocks: 0,
            num_512_bytes_blocks: 0,
            num_1024_bytes_blocks: 0,
            num_2048_bytes_blocks: 0,
            num_4096_bytes_blocks: 0,
            error_callback: None,
            threadsafe: false,
            full_overflow_checks: false,
            init_allocated_memory: false,
            error_dump_file_name: [0; DUMP_FILE_NAME_SIZE],
        }
    }
}

impl PoolSettings {
    /// Block count of class `idx`. Keep the index mapping in sync with the
    /// `num_<size>_bytes_blocks` fields and `CLASS_DATA_SIZES`.
    pub fn class_blocks(&self, idx: usize) -> usize {
        match idx {
            0 => self.num_32_bytes_blocks,
            1 => self.num_64_bytes_blocks,
            2 => self.num_128_bytes_blocks,
            3 => self.num_256_bytes_blocks,
            4 => self.num_512_bytes_blocks,
            5 => self.num_1024_bytes_blocks,
            6 => self.num_2048_bytes_blocks,
            7 => self.num_4096_bytes_blocks,
            _ => 0,
        }
    }

    /// `(data_size, block_count)` of class `idx`, ascending in `idx`.
    pub fn class_settings(&self, idx: usize) -> (usize, usize) {
        if idx < NUM_CLASSES {
            (CLASS_DATA_SIZES[idx], self.class_blocks(idx))
        } else {
            (0, 0)
        }
    }

    /// Total number of blocks across all classes.
    pub fn total_blocks(&self) -> usize {
        (0..NUM_CLASSES).map(|i| self.class_blocks(i)).sum()
    }

    /// The dump file name as a string, `None` when empty or not UTF-8.
    pub fn dump_file_name(&self) -> Option<&str> {
        let len = self
            .error_dump_file_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DUMP_FILE_NAME_SIZE);
        if len == 0 {
            return None;
        }
        core::str::from_utf8(&self.error_dump_file_name[..len]).ok()
    }

    /// Store `name` as the dump file name, truncated to the field size.
    pub fn set_dump_file_name(&mut self, name: &str) {
        self.error_dump_file_name = [0; DUMP_FILE_NAME_SIZE];
        let len = name.len().min(DUMP_FILE_NAME_SIZE - 1);
        self.error_dump_file_name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    /// Total bytes of backing memory a pool with these settings occupies,
    /// control sections and per-block overhead included.
    pub fn memory_requirements(&self) -> usize {
        crate::layout::memory_requirements(self)
    }

    /// Rewrite `total_size` from the per-class counts and delete a stale
    /// dump file. Returns whether the caller-supplied total was already
    /// consistent.
    pub(crate) fn sanitize(&mut self) -> bool {
        let initial_total = self.total_size;
        self.total_size = (0..NUM_CLASSES)
            .map(|i| {
                let (data_size, count) = self.class_settings(i);
                data_size * count
            })
            .sum();

        #[cfg(feature = "std")]
        if let Some(name) = self.dump_file_name() {
            // Stale dumps from a previous run would be misleading.
            let _ = std::fs::remove_file(name);
        }

        self.total_size == initial_total
    }
}
