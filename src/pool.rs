//! Pool lifecycle and the public API.
//!
//! A [`Pool`] is a thin handle over the base address of a self-contained
//! region: all state — settings, class table, auxiliary record, blocks —
//! lives inside the region itself. Handles are created once, may be
//! copied freely, and are destroyed once.

use crate::alloc;
use crate::block::{self, payload_is_block, Block};
use crate::class::ClassEntry;
use crate::config::NUM_CLASSES;
use crate::error::{self, ErrorCode};
use crate::layout;
use crate::platform;
use crate::poison::{POISON, POOL_HEAD, POOL_TAIL, UNSET};
use crate::settings::PoolSettings;
use crate::sync::PoolLock;
use crate::ALIGN;

/// Handle to a fixed-capacity memory pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pool {
    base: *mut u8,
}

// SAFETY: every mutating call synchronizes through the in-pool lock when
// the pool was created with `threadsafe`; otherwise the caller must
// serialize access, as with any raw allocator handle. Read-only calls
// touch only immutable or intentionally racy state.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Create a pool sized by `settings`.
    ///
    /// The usable total size is recomputed from the per-class counts; a
    /// caller-supplied mismatch still creates the pool but records
    /// [`ErrorCode::InconsistentSettings`]. Returns `None` when the OS
    /// refuses the backing region (the callback, if any, receives
    /// [`ErrorCode::NoMemory`]).
    pub fn create(settings: &PoolSettings) -> Option<Pool> {
        let mut sanitized = *settings;
        let consistent = sanitized.sanitize();
        let total = layout::memory_requirements(&sanitized);

        let base = unsafe { platform::region_alloc(total) };
        if base.is_null() {
            if let Some(callback) = sanitized.error_callback {
                callback(ErrorCode::NoMemory, error::CANNOT_CREATE_MSG);
            }
            return None;
        }

        unsafe {
            initialize(base, total, &sanitized);
            if !consistent {
                error::record_error(
                    base,
                    ErrorCode::InconsistentSettings,
                    error::INCONSISTENT_SETTINGS_MSG,
                    None,
                );
            }
        }

        Some(Pool { base })
    }

    /// Destroy the pool: zero-fill the whole region and return it to the
    /// OS. Returns `false` when the handle is not a valid pool. A lock
    /// failure during teardown is recorded (and reported through the
    /// callback) but does not stop the teardown.
    pub fn destroy(self) -> bool {
        if !unsafe { layout::is_pool(self.base) } {
            return false;
        }

        unsafe {
            let aux = layout::aux_ptr(self.base);
            if (*aux).lock_initialized != 0 {
                let lock = PoolLock::from_word(core::ptr::addr_of_mut!((*aux).lock_word));
                if lock.lock().is_err() {
                    error::record_error(
                        self.base,
                        ErrorCode::ThreadSyncError,
                        error::MUTEX_LOCK_MSG,
                        None,
                    );
                }
            }

            let total = layout::memory_requirements(&*layout::settings_ptr(self.base));
            core::ptr::write_bytes(self.base, 0, total);
            platform::region_free(self.base, total);
        }

        true
    }

    /// Allocate `size` bytes. Returns null when no class can satisfy the
    /// request (recording [`ErrorCode::NoMemory`]), when `size` is zero,
    /// or when the handle is invalid.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        if !unsafe { layout::is_pool(self.base) } {
            return core::ptr::null_mut();
        }
        unsafe { error::clear_error(layout::aux_ptr(self.base)) };
        if size == 0 {
            return core::ptr::null_mut();
        }

        let Ok(locked) = self.acquire() else {
            return core::ptr::null_mut();
        };
        let payload = unsafe { alloc::malloc_internal(self.base, size) };
        self.release(locked);
        payload
    }

    /// Free a payload pointer returned by [`Pool::malloc`] or
    /// [`Pool::realloc`]. A null `ptr` is a no-op; a pointer that is not a
    /// live payload records [`ErrorCode::PointerParamError`].
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// pool and not yet freed.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if !unsafe { layout::is_pool(self.base) } {
            return;
        }
        unsafe { error::clear_error(layout::aux_ptr(self.base)) };
        if ptr.is_null() {
            return;
        }

        let Ok(locked) = self.acquire() else {
            return;
        };
        if unsafe { payload_is_block(ptr) } {
            unsafe { alloc::free_internal(self.base, ptr) };
        } else {
            unsafe {
                error::record_error(
                    self.base,
                    ErrorCode::PointerParamError,
                    error::INVALID_POINTER_PARAM_MSG,
                    None,
                );
            }
        }
        self.release(locked);
    }

    /// Reallocate `ptr` to `size` bytes. `realloc(null, n)` behaves like
    /// `malloc(n)`; `realloc(p, 0)` frees `p` and returns null.
    ///
    /// Shrinking keeps the run length: vacated bytes are poisoned but tail
    /// blocks are only reclaimed when the whole allocation is freed. When
    /// growth forces a relocation, the original pointer is freed even if
    /// the replacement allocation fails — on a null return the old
    /// pointer is gone.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// pool and not yet freed.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if !unsafe { layout::is_pool(self.base) } {
            return core::ptr::null_mut();
        }
        unsafe { error::clear_error(layout::aux_ptr(self.base)) };
        if ptr.is_null() && size == 0 {
            return core::ptr::null_mut();
        }

        let Ok(locked) = self.acquire() else {
            return core::ptr::null_mut();
        };

        let result = if ptr.is_null() {
            unsafe { alloc::malloc_internal(self.base, size) }
        } else if unsafe { payload_is_block(ptr) } {
            if size == 0 {
                unsafe { alloc::free_internal(self.base, ptr) };
                core::ptr::null_mut()
            } else {
                unsafe { alloc::realloc_internal(self.base, ptr, size) }
            }
        } else {
            unsafe {
                error::record_error(
                    self.base,
                    ErrorCode::PointerParamError,
                    error::INVALID_POINTER_PARAM_MSG,
                    None,
                );
            }
            core::ptr::null_mut()
        };

        self.release(locked);
        result
    }

    /// The settings the pool was created with (after sanitization).
    /// Settings are immutable, so no locking is involved.
    pub fn settings(&self) -> Option<PoolSettings> {
        if !unsafe { layout::is_pool(self.base) } {
            return None;
        }
        Some(unsafe { *layout::settings_ptr(self.base) })
    }

    /// Copy the pool settings into `out`. Returns `false` when the handle
    /// is not a valid pool.
    pub fn get_settings(&self, out: &mut PoolSettings) -> bool {
        match self.settings() {
            Some(settings) => {
                *out = settings;
                true
            }
            None => false,
        }
    }

    /// The error code recorded by the last mutating call —
    /// [`ErrorCode::NoErr`] when it succeeded, [`ErrorCode::InvalidMempool`]
    /// when the handle is not a valid pool. Reads without locking.
    pub fn last_error_code(&self) -> ErrorCode {
        if !unsafe { layout::is_pool(self.base) } {
            return ErrorCode::InvalidMempool;
        }
        ErrorCode::from_word(unsafe { (*layout::aux_ptr(self.base)).last_error })
    }

    /// The message recorded by the last mutating call, empty when it
    /// succeeded. Borrowed from pool memory: stable until the next call
    /// on this pool. Reads without locking.
    pub fn last_error_message(&self) -> &str {
        if !unsafe { layout::is_pool(self.base) } {
            return error::NOT_A_MEMPOOL_MSG;
        }
        unsafe {
            let aux = layout::aux_ptr(self.base);
            let len = (*aux).message_len.min((*aux).message.len());
            core::str::from_utf8(&(&(*aux).message)[..len]).unwrap_or("")
        }
    }

    /// The recorded data size of a live allocation, `None` when `ptr` is
    /// not a live payload of this pool. Read-only; records no error.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer into this pool's region.
    pub unsafe fn alloc_size(&self, ptr: *const u8) -> Option<usize> {
        if ptr.is_null() || !unsafe { layout::is_pool(self.base) } {
            return None;
        }
        unsafe {
            let block = Block::from_payload(ptr as *mut u8);
            if !block.head_is_valid() {
                return None;
            }
            let run_len = block.run_count();
            let data_size = block.data_size();
            if run_len == UNSET || data_size == UNSET {
                return None;
            }
            Some(data_size)
        }
    }

    /// Acquire the pool lock when one is initialized. `Ok(true)` means it
    /// is held; a failure records [`ErrorCode::ThreadSyncError`] and the
    /// caller aborts its operation.
    fn acquire(&self) -> Result<bool, ()> {
        unsafe {
            let aux = layout::aux_ptr(self.base);
            if (*aux).lock_initialized == 0 {
                return Ok(false);
            }
            let lock = PoolLock::from_word(core::ptr::addr_of_mut!((*aux).lock_word));
            match lock.lock() {
                Ok(()) => Ok(true),
                Err(_) => {
                    error::record_error(
                        self.base,
                        ErrorCode::ThreadSyncError,
                        error::MUTEX_LOCK_MSG,
                        None,
                    );
                    Err(())
                }
            }
        }
    }

    /// Release the lock acquired by [`Pool::acquire`]. A failure is
    /// recorded; the completed operation stands.
    fn release(&self, locked: bool) {
        if !locked {
            return;
        }
        unsafe {
            let aux = layout::aux_ptr(self.base);
            let lock = PoolLock::from_word(core::ptr::addr_of_mut!((*aux).lock_word));
            if lock.unlock().is_err() {
                error::record_error(
                    self.base,
                    ErrorCode::ThreadSyncError,
                    error::MUTEX_UNLOCK_MSG,
                    None,
                );
            }
        }
    }
}

/// Lay out a freshly allocated region as an empty pool.
///
/// # Safety
///
/// `base` must address `total` writable bytes sized by
/// `memory_requirements(settings)` for already-sanitized `settings`.
unsafe fn initialize(base: *mut u8, total: usize, settings: &PoolSettings) {
    unsafe {
        core::ptr::write_bytes(base, POISON, total);
        core::ptr::copy_nonoverlapping(POOL_HEAD.as_ptr(), base, ALIGN);
        core::ptr::copy_nonoverlapping(
            POOL_TAIL.as_ptr(),
            base.add(total - ALIGN),
            ALIGN,
        );
        core::ptr::write(layout::settings_ptr(base), *settings);
        initialize_class_table(base);
        initialize_aux(base);
        initialize_blocks(base);
    }
}

/// Build the class table: contiguous class regions in ascending data-size
/// order, cursors spanning each class's whole block range.
unsafe fn initialize_class_table(base: *mut u8) {
    unsafe {
        let settings = &*layout::settings_ptr(base);
        let classes = layout::classes_ptr(base);
        let mut region_start = layout::first_block_ptr(base);

        for i in 0..NUM_CLASSES {
            let (data_size, total_blocks) = settings.class_settings(i);
            let stride = block::stride(data_size);

            let entry = if total_blocks > 0 {
                let last = region_start.add((total_blocks - 1) * stride);
                ClassEntry {
                    start_address: region_start,
                    first_free_address: region_start,
                    last_free_address: last,
                    last_address: last,
                    data_size,
                    total_blocks,
                    occupied_blocks: 0,
                }
            } else {
                ClassEntry {
                    start_address: core::ptr::null_mut(),
                    first_free_address: core::ptr::null_mut(),
                    last_free_address: core::ptr::null_mut(),
                    last_address: core::ptr::null_mut(),
                    data_size,
                    total_blocks: 0,
                    occupied_blocks: 0,
                }
            };
            core::ptr::write(classes.add(i), entry);

            region_start = region_start.add(total_blocks * stride);
        }
    }
}

unsafe fn initialize_aux(base: *mut u8) {
    unsafe {
        let settings = &*layout::settings_ptr(base);
        let aux = layout::aux_ptr(base);

        (*aux).lock_initialized = 0;
        if settings.threadsafe {
            let lock = PoolLock::from_word(core::ptr::addr_of_mut!((*aux).lock_word));
            lock.init();
            (*aux).lock_initialized = 1;
        }

        error::clear_error(aux);
    }
}

/// Write every block's free-state metadata. Payloads already carry the
/// poison fill from the region-wide initialization.
unsafe fn initialize_blocks(base: *mut u8) {
    unsafe {
        let classes = layout::classes_ptr(base);
        for i in 0..NUM_CLASSES {
            let class = &*classes.add(i);
            let stride = class.stride();
            for j in 0..class.total_blocks {
                Block(class.start_address.add(j * stride)).mark_free(class.data_size);
            }
        }
    }
}
