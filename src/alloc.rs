//! Allocator core: class selection, single- and multi-block allocation,
//! reallocation, and free.
//!
//! All functions here run with the pool lock held (when the pool is
//! threadsafe) and receive the pool base address; every metadata access
//! derives from it through the `layout` and `block` helpers.
//!
//! Class selection order for a request of `n` bytes:
//! 1. the smallest class, when it fits in one block and has one free;
//! 2. descending from the largest class: the best single-block fit wins
//!    outright; an over-sized candidate is remembered; a class too small
//!    for one block is probed for a contiguous multi-block run;
//! 3. a multi-block run in the smallest class, as a last resort;
//! 4. with both an over-sized single-block candidate and a multi-block
//!    candidate, the class keeping more free bytes after the hypothetical
//!    allocation wins.

use crate::block::{self, run_payload_size, Block};
use crate::class::{ClassEntry, RunScan};
use crate::config::NUM_CLASSES;
use crate::error::{self, ErrorCode};
use crate::layout;
use crate::poison::{is_uniform, POISON, UNSET};
use crate::ALIGN;
use crate::{stat_add, stat_inc};

/// Allocate `size` bytes from whichever class serves it best.
///
/// # Safety
///
/// `base` must be a live pool; the lock must be held when threadsafe.
pub(crate) unsafe fn malloc_internal(base: *mut u8, size: usize) -> *mut u8 {
    let classes = unsafe { layout::classes_ptr(base) };

    stat_inc!(alloc_count);
    stat_add!(alloc_bytes, size as u64);

    // Best case: the smallest class already fits the request.
    if unsafe { (*classes).fits_one_block(size) } {
        return unsafe { malloc_one_block(base, classes, size) };
    }

    // Smallest over-sized class that could take the request in one block.
    let mut large_idx: Option<usize> = None;
    // Multi-block candidate: (class index, run start, run length).
    let mut multi: Option<(usize, *mut u8, usize)> = None;

    for i in (1..NUM_CLASSES).rev() {
        let class = unsafe { classes.add(i) };
        if !unsafe { (*class).has_free() } {
            continue;
        }
        if unsafe { (*class).fits_one_block(size) } {
            if unsafe { (*classes.add(i - 1)).data_size } < size {
                // Best single-block fit: the next class down is too small.
                return unsafe { malloc_one_block(base, class, size) };
            }
            large_idx = Some(i);
        } else {
            match unsafe { (*class).find_free_run(size) } {
                RunScan::Found { block, run_len } => {
                    multi = Some((i, block, run_len));
                    break;
                }
                RunScan::NoSpace => {}
                RunScan::Broken => unsafe {
                    error::record_error(
                        base,
                        ErrorCode::InconsistentBlocks,
                        error::BLOCK_INCONSISTENCY_MSG,
                        Some(class as *const u8),
                    );
                },
            }
        }
    }

    // The descending scan never probes class 0 for runs; do it last.
    if multi.is_none() && unsafe { (*classes).has_free() } {
        match unsafe { (*classes).find_free_run(size) } {
            RunScan::Found { block, run_len } => multi = Some((0, block, run_len)),
            RunScan::NoSpace => {}
            RunScan::Broken => unsafe {
                error::record_error(
                    base,
                    ErrorCode::InconsistentBlocks,
                    error::BLOCK_INCONSISTENCY_MSG,
                    Some(classes as *const u8),
                );
            },
        }
    }

    match (large_idx, multi) {
        (Some(large), Some((small, run_start, run_len))) => {
            let large_entry = unsafe { &*classes.add(large) };
            let small_entry = unsafe { &*classes.add(small) };
            // Keep the most free bytes in the winning class after the
            // hypothetical allocation; ties go to the multi-block run.
            let residual_large = large_entry.data_size
                * (large_entry.total_blocks - large_entry.occupied_blocks - 1);
            let residual_small = small_entry.data_size
                * (small_entry.total_blocks - small_entry.occupied_blocks - run_len);
            if residual_large > residual_small {
                unsafe { malloc_one_block(base, classes.add(large), size) }
            } else {
                unsafe { malloc_multi_blocks(base, classes.add(small), size, run_start, run_len) }
            }
        }
        (Some(large), None) => unsafe { malloc_one_block(base, classes.add(large), size) },
        (None, Some((small, run_start, run_len))) => unsafe {
            malloc_multi_blocks(base, classes.add(small), size, run_start, run_len)
        },
        (None, None) => {
            stat_inc!(failed_allocs);
            unsafe {
                error::record_error(base, ErrorCode::NoMemory, error::NO_MEMORY_MSG, None);
            }
            core::ptr::null_mut()
        }
    }
}

/// Verify and rewrite the metadata of `count` free blocks that are about
/// to serve one allocation. Sentinel or counter damage and (under full
/// checks) broken poison fills are reported as `Overflow` and repaired.
/// Inner blocks' head/counters and tails are poisoned; `keep_start` and
/// `keep_end` retain the first block's head and the last block's tail.
///
/// # Safety
///
/// `start` must be the first of `count` in-class blocks of a live pool.
unsafe fn coalesce_free_blocks(
    base: *mut u8,
    data_size: usize,
    start: Block,
    count: usize,
    keep_start: bool,
    keep_end: bool,
) {
    let stride = block::stride(data_size);
    let full_checks = unsafe { (*layout::settings_ptr(base)).full_overflow_checks };

    for i in 0..count {
        let current = unsafe { start.offset_blocks(stride, i) };

        if !unsafe { current.head_is_valid() } {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(current.0 as *const u8),
                );
            }
        }

        if !unsafe { current.tail_is_valid(data_size) } {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(current.tail_ptr(data_size) as *const u8),
                );
            }
        }

        if unsafe { current.run_count() } != UNSET || unsafe { current.data_size() } != UNSET {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(current.counters_addr()),
                );
            }
        }

        if full_checks {
            let payload = unsafe { current.payload() };
            let bytes = unsafe { core::slice::from_raw_parts(payload, data_size) };
            if !is_uniform(bytes, POISON) {
                unsafe {
                    error::record_error(
                        base,
                        ErrorCode::Overflow,
                        error::OVERFLOW_MSG,
                        Some(payload as *const u8),
                    );
                    core::ptr::write_bytes(payload, POISON, data_size);
                }
            }
        }

        if !keep_start || i > 0 {
            unsafe { current.poison_start_control() };
        } else {
            unsafe {
                current.write_head();
                current.set_run_count(UNSET);
                current.set_data_size(UNSET);
            }
        }

        if !keep_end || i != count - 1 {
            unsafe {
                core::ptr::write_bytes(current.tail_ptr(data_size), POISON, ALIGN);
            }
        } else {
            unsafe { current.write_tail(data_size) };
        }
    }
}

/// Serve `size` bytes from the first free block of `class`.
///
/// # Safety
///
/// `base` must be a live pool; `class` one of its class entries.
unsafe fn malloc_one_block(base: *mut u8, class: *mut ClassEntry, size: usize) -> *mut u8 {
    if unsafe { (*class).total_blocks <= (*class).occupied_blocks } {
        unsafe {
            error::record_error(
                base,
                ErrorCode::InconsistentBlocks,
                error::BLOCK_INCONSISTENCY_MSG,
                Some(class as *const u8),
            );
        }
        return core::ptr::null_mut();
    }

    if unsafe { (*class).first_free_address.is_null() || (*class).last_free_address.is_null() } {
        unsafe {
            error::record_error(
                base,
                ErrorCode::InconsistentBlocks,
                error::BLOCK_INCONSISTENCY_MSG,
                Some(class as *const u8),
            );
            (*class).saturate();
        }
        return core::ptr::null_mut();
    }

    let data_size = unsafe { (*class).data_size };
    let block = Block(unsafe { (*class).first_free_address });

    unsafe { coalesce_free_blocks(base, data_size, block, 1, true, true) };

    let payload = unsafe { block.payload() };
    if unsafe { (*layout::settings_ptr(base)).init_allocated_memory } {
        unsafe { core::ptr::write_bytes(payload, 0, size) };
    }

    unsafe {
        block.set_run_count(1);
        block.set_data_size(size);
        (*class).occupied_blocks += 1;
        if (*class).occupied_blocks < (*class).total_blocks {
            (&mut *class).advance_first_free(block.0);
        } else {
            (&mut *class).saturate();
        }
    }

    payload
}

/// Serve `size` bytes from `run_len` contiguous free blocks starting at
/// `run_start` (found by the feasibility scan).
///
/// # Safety
///
/// `base` must be a live pool; `class` one of its entries; `run_start`
/// the verified run start inside that class.
unsafe fn malloc_multi_blocks(
    base: *mut u8,
    class: *mut ClassEntry,
    size: usize,
    run_start: *mut u8,
    run_len: usize,
) -> *mut u8 {
    if unsafe { (*class).total_blocks <= (*class).occupied_blocks } {
        unsafe {
            error::record_error(
                base,
                ErrorCode::InconsistentBlocks,
                error::BLOCK_INCONSISTENCY_MSG,
                Some(class as *const u8),
            );
        }
        return core::ptr::null_mut();
    }

    if run_start.is_null()
        || unsafe { (*class).first_free_address.is_null() || (*class).last_free_address.is_null() }
    {
        unsafe {
            error::record_error(
                base,
                ErrorCode::InconsistentBlocks,
                error::BLOCK_INCONSISTENCY_MSG,
                Some(class as *const u8),
            );
            (*class).saturate();
        }
        return core::ptr::null_mut();
    }

    stat_inc!(multi_block_allocs);

    let data_size = unsafe { (*class).data_size };
    let block = Block(run_start);

    unsafe { coalesce_free_blocks(base, data_size, block, run_len, true, true) };

    let payload = unsafe { block.payload() };
    if unsafe { (*layout::settings_ptr(base)).init_allocated_memory } {
        unsafe { core::ptr::write_bytes(payload, 0, size) };
    }

    unsafe {
        block.set_run_count(run_len);
        block.set_data_size(size);
        (*class).occupied_blocks += run_len;
        if (*class).occupied_blocks < (*class).total_blocks {
            if (*class).first_free_address == run_start {
                let run_last = block.offset_blocks((*class).stride(), run_len - 1);
                (&mut *class).advance_first_free(run_last.0);
            }
        } else {
            (&mut *class).saturate();
        }
    }

    payload
}

/// Locate the class owning `payload` and validate the run metadata on the
/// way: damaged sentinels are reported and rewritten, damaged counters
/// are reported, forced back to the free marker, and fail the lookup.
///
/// # Safety
///
/// `base` must be a live pool; `payload` at least one payload offset into
/// its region.
pub(crate) unsafe fn class_for_ptr(base: *mut u8, payload: *mut u8) -> Option<*mut ClassEntry> {
    let classes = unsafe { layout::classes_ptr(base) };
    let block = unsafe { Block::from_payload(payload) };

    if !unsafe { block.head_is_valid() } {
        unsafe {
            error::record_error(
                base,
                ErrorCode::Overflow,
                error::OVERFLOW_MSG,
                Some(block.0 as *const u8),
            );
            block.write_head();
        }
    }

    let run_len = unsafe { block.run_count() };
    if run_len == UNSET {
        unsafe {
            block.set_data_size(UNSET);
            error::record_error(
                base,
                ErrorCode::Overflow,
                error::OVERFLOW_MSG,
                Some(block.counters_addr()),
            );
        }
        return None;
    }

    let data_size = unsafe { block.data_size() };
    if data_size == UNSET {
        unsafe {
            block.set_run_count(UNSET);
            error::record_error(
                base,
                ErrorCode::Overflow,
                error::OVERFLOW_MSG,
                Some(block.counters_addr()),
            );
        }
        return None;
    }

    for i in 0..NUM_CLASSES {
        let class = unsafe { classes.add(i) };
        if !unsafe { (*class).contains(block.0) } {
            continue;
        }

        // The recorded run must stay inside the class and the recorded
        // size inside the run; anything else is a corrupted counter.
        let stride = unsafe { (*class).stride() };
        let run_in_class = run_len >= 1
            && (run_len - 1)
                .checked_mul(stride)
                .and_then(|span| (block.0 as usize).checked_add(span))
                .is_some_and(|last| last <= unsafe { (*class).last_address } as usize);
        if !run_in_class
            || data_size > run_payload_size(unsafe { (*class).data_size }, run_len)
        {
            unsafe {
                block.set_run_count(UNSET);
                block.set_data_size(UNSET);
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(block.counters_addr()),
                );
            }
            return None;
        }

        let payload_size = run_payload_size(unsafe { (*class).data_size }, run_len);
        if !unsafe { block.tail_is_valid(payload_size) } {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(block.tail_ptr(payload_size) as *const u8),
                );
                block.write_tail(payload_size);
            }
        }

        return Some(class);
    }

    None
}

/// Free the run addressed by `payload`.
///
/// # Safety
///
/// `base` must be a live pool; `payload` must carry the block head
/// sentinel; the lock must be held when threadsafe.
pub(crate) unsafe fn free_internal(base: *mut u8, payload: *mut u8) {
    match unsafe { class_for_ptr(base, payload) } {
        Some(class) => unsafe { free_run(base, class, payload) },
        None => unsafe {
            error::record_error(
                base,
                ErrorCode::PointerParamError,
                error::INVALID_POINTER_PARAM_MSG,
                None,
            );
        },
    }
}

/// Free a validated run: check the unused tail, poison the whole payload
/// span, restore every block's free metadata, and widen the cursors.
///
/// # Safety
///
/// `payload` must have passed `class_for_ptr` for `class`.
unsafe fn free_run(base: *mut u8, class: *mut ClassEntry, payload: *mut u8) {
    stat_inc!(free_count);

    let block = unsafe { Block::from_payload(payload) };
    let run_len = unsafe { block.run_count() };
    let data_size = unsafe { block.data_size() };
    let class_data_size = unsafe { (*class).data_size };
    let payload_size = run_payload_size(class_data_size, run_len);

    if unsafe { (*layout::settings_ptr(base)).full_overflow_checks } {
        let tail =
            unsafe { core::slice::from_raw_parts(payload.add(data_size), payload_size - data_size) };
        if !is_uniform(tail, POISON) {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(payload.add(data_size) as *const u8),
                );
            }
        }
    }

    unsafe {
        core::ptr::write_bytes(payload, POISON, payload_size);
        let stride = (*class).stride();
        for i in 0..run_len {
            block.offset_blocks(stride, i).mark_free(class_data_size);
        }
        (*class).occupied_blocks = (*class).occupied_blocks.saturating_sub(run_len);
        let run_last = block.offset_blocks(stride, run_len - 1);
        (&mut *class).relax_cursors(block.0, run_last.0);
    }
}

/// Reallocate the run addressed by `payload` to `size` bytes.
///
/// # Safety
///
/// As [`free_internal`].
pub(crate) unsafe fn realloc_internal(base: *mut u8, payload: *mut u8, size: usize) -> *mut u8 {
    match unsafe { class_for_ptr(base, payload) } {
        Some(class) => unsafe { realloc_run(base, class, payload, size) },
        None => {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::PointerParamError,
                    error::INVALID_POINTER_PARAM_MSG,
                    None,
                );
            }
            core::ptr::null_mut()
        }
    }
}

/// Resize a validated run. Shrinks poison the vacated suffix but keep the
/// run length; growth extends in place when the blocks right after the
/// run are free, and relocates (allocate, copy, free) otherwise.
///
/// # Safety
///
/// `payload` must have passed `class_for_ptr` for `class`.
unsafe fn realloc_run(base: *mut u8, class: *mut ClassEntry, payload: *mut u8, size: usize) -> *mut u8 {
    stat_inc!(realloc_count);

    let block = unsafe { Block::from_payload(payload) };
    let run_len = unsafe { block.run_count() };
    let data_size = unsafe { block.data_size() };
    let class_data_size = unsafe { (*class).data_size };
    let stride = unsafe { (*class).stride() };
    let payload_size = run_payload_size(class_data_size, run_len);
    let settings = unsafe { layout::settings_ptr(base) };

    if unsafe { (*settings).full_overflow_checks } {
        let tail =
            unsafe { core::slice::from_raw_parts(payload.add(data_size), payload_size - data_size) };
        if !is_uniform(tail, POISON) {
            unsafe {
                error::record_error(
                    base,
                    ErrorCode::Overflow,
                    error::OVERFLOW_MSG,
                    Some(payload.add(data_size) as *const u8),
                );
                core::ptr::write_bytes(payload.add(data_size), POISON, payload_size - data_size);
            }
        }
    }

    if size == data_size {
        return payload;
    }

    if size < data_size {
        // The run is not shortened: vacated bytes are poisoned but tail
        // blocks stay claimed until the whole run is freed.
        unsafe {
            core::ptr::write_bytes(payload.add(size), POISON, data_size - size);
            block.set_data_size(size);
        }
        return payload;
    }

    if size <= payload_size {
        if unsafe { (*settings).init_allocated_memory } {
            unsafe { core::ptr::write_bytes(payload.add(data_size), 0, size - data_size) };
        }
        unsafe { block.set_data_size(size) };
        return payload;
    }

    // The run must grow by whole blocks of the same class.
    let extra = (size - payload_size).div_ceil(stride);
    let free_blocks =
        unsafe { (*class).total_blocks.saturating_sub((*class).occupied_blocks) };
    if extra <= free_blocks {
        let last_needed = block.0 as usize + (run_len + extra - 1) * stride;
        let in_class = last_needed <= unsafe { (*class).last_address } as usize;

        let contiguous = in_class
            && (0..extra).all(|i| unsafe {
                block.offset_blocks(stride, run_len + i).run_count() == UNSET
            });

        if contiguous {
            stat_inc!(inplace_extends);

            let old_tail = unsafe { block.tail_ptr(payload_size) };
            unsafe {
                coalesce_free_blocks(
                    base,
                    class_data_size,
                    block.offset_blocks(stride, run_len),
                    extra,
                    false,
                    true,
                );
                core::ptr::write_bytes(old_tail, POISON, ALIGN);

                if (*settings).init_allocated_memory {
                    core::ptr::write_bytes(payload.add(data_size), 0, size - data_size);
                }

                block.set_run_count(run_len + extra);
                block.set_data_size(size);
                (*class).occupied_blocks += extra;
                if (*class).occupied_blocks >= (*class).total_blocks {
                    (&mut *class).saturate();
                } else {
                    // The extension may have swallowed the block the free
                    // cursor pointed at; move it past the grown run.
                    let new_last = block.offset_blocks(stride, run_len + extra - 1);
                    let cursor = (*class).first_free_address as usize;
                    if cursor >= block.0 as usize && cursor <= new_last.0 as usize {
                        (&mut *class).advance_first_free(new_last.0);
                    }
                }
            }
            return payload;
        }
    }

    // Relocate. The original run is freed even when the replacement
    // allocation fails: on null return the old pointer is gone.
    stat_inc!(relocations);
    let new_payload = unsafe { malloc_internal(base, size) };
    if !new_payload.is_null() {
        unsafe { core::ptr::copy_nonoverlapping(payload, new_payload, data_size) };
    }
    unsafe { free_run(base, class, payload) };
    new_payload
}
