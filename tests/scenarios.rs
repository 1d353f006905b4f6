//! End-to-end behavior of the public API: class selection, multi-block
//! runs, reallocation, and the malloc/free/realloc laws.

use fixpool::{ErrorCode, Pool, PoolSettings, ALIGN};

fn pool_with(counts: &[(usize, usize)]) -> Pool {
    let mut settings = PoolSettings::default();
    for &(size, count) in counts {
        match size {
            32 => settings.num_32_bytes_blocks = count,
            64 => settings.num_64_bytes_blocks = count,
            128 => settings.num_128_bytes_blocks = count,
            256 => settings.num_256_bytes_blocks = count,
            512 => settings.num_512_bytes_blocks = count,
            1024 => settings.num_1024_bytes_blocks = count,
            2048 => settings.num_2048_bytes_blocks = count,
            4096 => settings.num_4096_bytes_blocks = count,
            _ => panic!("no such class: {size}"),
        }
        settings.total_size += size * count;
    }
    let pool = Pool::create(&settings).unwrap();
    assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    pool
}

#[test]
fn create_recomputes_total_size() {
    let pool = pool_with(&[(64, 4)]);
    let settings = pool.settings().unwrap();
    assert_eq!(settings.total_size, 256);

    // Backing bytes = control sections + per-block overhead + total size.
    let control = PoolSettings::default().memory_requirements();
    assert_eq!(
        settings.memory_requirements(),
        control + 4 * (64 + 3 * ALIGN)
    );
    assert!(pool.destroy());
}

#[test]
fn small_request_takes_best_single_block_fit() {
    let pool = pool_with(&[(32, 1), (64, 1)]);
    let p = pool.malloc(32);
    assert!(!p.is_null());
    // The 32-byte block served the request, so the 64-byte block is
    // still available.
    let q = pool.malloc(64);
    assert!(!q.is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    assert!(pool.malloc(1).is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoMemory);
    assert!(pool.destroy());
}

#[test]
fn oversized_request_coalesces_two_blocks() {
    let pool = pool_with(&[(64, 4)]);
    // 64 < 100 <= 2*64 + 3*ALIGN, so the run spans two blocks.
    let p = pool.malloc(100);
    assert!(!p.is_null());
    assert_eq!(unsafe { pool.alloc_size(p) }, Some(100));

    // Two blocks remain for single allocations.
    let q = pool.malloc(64);
    let r = pool.malloc(64);
    assert!(!q.is_null() && !r.is_null());
    assert!(pool.malloc(1).is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoMemory);
    assert!(pool.destroy());
}

#[test]
fn run_payload_spans_subsumed_metadata() {
    let pool = pool_with(&[(64, 2)]);
    // A 2-block run exposes 2*64 + 3*ALIGN usable bytes; every one of
    // them must be writable without tripping the overflow checks.
    let size = 2 * 64 + 3 * ALIGN;
    let p = pool.malloc(size);
    assert!(!p.is_null());
    unsafe {
        core::ptr::write_bytes(p, 0x5A, size);
        pool.free(p);
    }
    assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    assert!(pool.destroy());
}

#[test]
fn realloc_grows_in_place_when_neighbour_is_free() {
    let pool = pool_with(&[(64, 4)]);
    let p = pool.malloc(60);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p, 0x7E, 60) };

    let q = unsafe { pool.realloc(p, 100) };
    assert_eq!(q, p, "the adjacent block was free; no relocation expected");
    assert_eq!(unsafe { pool.alloc_size(q) }, Some(100));
    let bytes = unsafe { core::slice::from_raw_parts(q, 60) };
    assert!(bytes.iter().all(|&b| b == 0x7E));

    // The extension consumed a second block: two singles remain.
    assert!(!pool.malloc(64).is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(pool.malloc(64).is_null());
    assert!(pool.destroy());
}

#[test]
fn realloc_relocates_to_a_larger_class() {
    let pool = pool_with(&[(64, 4), (512, 1)]);
    let p = pool.malloc(60);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p, 0x42, 60) };
    // Fill the rest of the 64-byte class so in-place extension is
    // impossible.
    for _ in 0..3 {
        assert!(!pool.malloc(64).is_null());
    }

    let q = unsafe { pool.realloc(p, 500) };
    assert!(!q.is_null());
    assert_ne!(q, p);
    assert_eq!(unsafe { pool.alloc_size(q) }, Some(500));
    let bytes = unsafe { core::slice::from_raw_parts(q, 60) };
    assert!(bytes.iter().all(|&b| b == 0x42));

    // The original block was freed by the relocation.
    assert!(!pool.malloc(64).is_null());
    assert!(pool.destroy());
}

#[test]
fn realloc_same_size_returns_same_pointer() {
    let pool = pool_with(&[(64, 2)]);
    let p = pool.malloc(48);
    let n = unsafe { pool.alloc_size(p) }.unwrap();
    let q = unsafe { pool.realloc(p, n) };
    assert_eq!(q, p);
    assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    assert!(pool.destroy());
}

#[test]
fn realloc_shrink_keeps_pointer_and_content() {
    let pool = pool_with(&[(64, 4)]);
    let p = pool.malloc(100);
    unsafe { core::ptr::write_bytes(p, 0x33, 100) };
    let q = unsafe { pool.realloc(p, 40) };
    assert_eq!(q, p);
    assert_eq!(unsafe { pool.alloc_size(q) }, Some(40));
    let bytes = unsafe { core::slice::from_raw_parts(q, 40) };
    assert!(bytes.iter().all(|&b| b == 0x33));

    // Shrinking does not reclaim the run's tail blocks: the two-block
    // run still holds both, leaving two free singles.
    assert!(!pool.malloc(64).is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(pool.malloc(64).is_null());
    assert!(pool.destroy());
}

#[test]
fn realloc_null_behaves_like_malloc() {
    let pool = pool_with(&[(64, 2)]);
    let p = unsafe { pool.realloc(core::ptr::null_mut(), 50) };
    assert!(!p.is_null());
    assert_eq!(unsafe { pool.alloc_size(p) }, Some(50));
    assert!(pool.destroy());
}

#[test]
fn realloc_zero_behaves_like_free() {
    let pool = pool_with(&[(64, 1)]);
    let p = pool.malloc(50);
    assert!(!p.is_null());
    let q = unsafe { pool.realloc(p, 0) };
    assert!(q.is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    // The block is free again.
    assert!(!pool.malloc(64).is_null());
    assert!(pool.destroy());
}

#[test]
fn free_after_malloc_restores_capacity() {
    let pool = pool_with(&[(32, 2), (64, 2)]);
    for size in [1, 31, 32, 33, 64, 100] {
        let p = pool.malloc(size);
        assert!(!p.is_null(), "malloc({size}) failed");
        unsafe { pool.free(p) };
        assert_eq!(pool.last_error_code(), ErrorCode::NoErr);
    }
    // Every block is free again: the pool fills to its exact capacity.
    assert!(!pool.malloc(32).is_null());
    assert!(!pool.malloc(32).is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(pool.malloc(1).is_null());
    assert!(pool.destroy());
}

#[test]
fn exact_class_size_uses_one_block() {
    let pool = pool_with(&[(64, 2)]);
    assert!(!pool.malloc(64).is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(pool.malloc(1).is_null());
    assert!(pool.destroy());
}

#[test]
fn largest_class_overflow_goes_multi_block() {
    let pool = pool_with(&[(4096, 2)]);
    let p = pool.malloc(4097);
    assert!(!p.is_null());
    assert_eq!(unsafe { pool.alloc_size(p) }, Some(4097));
    // Both 4 KiB blocks are claimed by the run.
    assert!(pool.malloc(1).is_null());
    unsafe { pool.free(p) };
    assert!(!pool.malloc(4096).is_null());
    assert!(pool.destroy());
}

#[test]
fn residual_tie_break_prefers_emptier_class() {
    // A 100-byte request could take the single 4 KiB block or a 2-block
    // run in the 64-byte class. The run leaves 128 free bytes in its
    // class, the single block zero: the run wins.
    let pool = pool_with(&[(64, 4), (4096, 1)]);
    let p = pool.malloc(100);
    assert!(!p.is_null());
    assert!(
        !pool.malloc(4096).is_null(),
        "the 4 KiB block should have been preserved"
    );
    assert!(pool.destroy());

    // Flipped occupancies: consuming two of two 64-byte blocks leaves
    // nothing, while one of two 4 KiB blocks leaves 4096 free bytes.
    let pool = pool_with(&[(64, 2), (4096, 2)]);
    let p = pool.malloc(100);
    assert!(!p.is_null());
    assert!(!pool.malloc(64).is_null());
    assert!(
        !pool.malloc(64).is_null(),
        "both 64-byte blocks should have been preserved"
    );
    assert!(pool.destroy());
}

#[test]
fn no_cross_class_coalescing() {
    // 200 bytes fit in no single 32-byte block and the class has no
    // 7-block run; the pool must refuse even though 224 bytes are free
    // across classes.
    let pool = pool_with(&[(32, 3), (64, 2)]);
    for _ in 0..2 {
        assert!(!pool.malloc(64).is_null());
    }
    assert!(pool.malloc(200).is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoMemory);
    assert!(pool.destroy());
}

#[test]
fn interleaved_frees_leave_usable_runs() {
    let pool = pool_with(&[(64, 6)]);
    let ptrs: Vec<_> = (0..6).map(|_| pool.malloc(64)).collect();
    assert!(ptrs.iter().all(|p| !p.is_null()));

    // Free blocks 2..5, leaving a 4-block hole inside the class.
    for &p in &ptrs[2..6] {
        unsafe { pool.free(p) };
    }
    let big = pool.malloc(300); // needs ceil((300+48)/112) = 4 blocks
    assert!(!big.is_null());
    assert_eq!(unsafe { pool.alloc_size(big) }, Some(300));
    assert!(pool.malloc(64).is_null());
    assert!(pool.destroy());
}
