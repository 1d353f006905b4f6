//! Parallel mutators on a `threadsafe` pool: allocate, fill, verify, and
//! free from many threads at once. Capacity is sized so no thread ever
//! sees a spurious NoMemory; any locking bug shows up as a pattern
//! mismatch or a poisoned-metadata report.

use fixpool::{ErrorCode, Pool, PoolSettings};

fn fill_pattern(ptr: *mut u8, size: usize, seed: usize) {
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

fn check_pattern(ptr: *const u8, size: usize, seed: usize) -> bool {
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn concurrent_malloc_free() {
    let settings = PoolSettings {
        total_size: 64 * 64,
        num_64_bytes_blocks: 64,
        threadsafe: true,
        ..PoolSettings::default()
    };
    let pool = Pool::create(&settings).unwrap();

    let nthreads = 8;
    let ops = 400;
    // Each thread keeps at most 8 single-block allocations live:
    // 8 threads * 8 blocks = 64 blocks, exactly the capacity.
    let handles: Vec<_> = (0..nthreads)
        .map(|tid| {
            std::thread::spawn(move || {
                let mut live: Vec<(*mut u8, usize, usize)> = Vec::new();
                for i in 0..ops {
                    let size = [8, 16, 32, 48, 64][(tid + i) % 5];
                    let p = pool.malloc(size);
                    assert!(!p.is_null(), "thread {tid} op {i}: malloc({size})");
                    let seed = tid * 1000 + i;
                    fill_pattern(p, size, seed);
                    live.push((p, size, seed));

                    if live.len() == 8 {
                        for (p, size, seed) in live.drain(..) {
                            assert!(
                                check_pattern(p, size, seed),
                                "thread {tid}: cross-thread corruption"
                            );
                            unsafe { pool.free(p) };
                        }
                    }
                }
                for (p, size, seed) in live {
                    assert!(check_pattern(p, size, seed));
                    unsafe { pool.free(p) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // All threads returned their blocks.
    for _ in 0..64 {
        assert!(!pool.malloc(64).is_null());
    }
    assert!(pool.malloc(1).is_null());
    assert_eq!(pool.last_error_code(), ErrorCode::NoMemory);
    assert!(pool.destroy());
}

#[test]
fn concurrent_realloc() {
    let settings = PoolSettings {
        total_size: 32 * 128,
        num_128_bytes_blocks: 32,
        threadsafe: true,
        full_overflow_checks: true,
        ..PoolSettings::default()
    };
    let pool = Pool::create(&settings).unwrap();

    // Each thread holds one run of at most 2 blocks, plus 2 more while a
    // relocation is in flight: far below the 32-block capacity.
    let handles: Vec<_> = (0..4)
        .map(|tid| {
            std::thread::spawn(move || {
                for i in 0..200 {
                    let seed = tid * 7919 + i;
                    let p = pool.malloc(100);
                    assert!(!p.is_null());
                    fill_pattern(p, 100, seed);

                    let q = unsafe { pool.realloc(p, 200) };
                    assert!(!q.is_null(), "thread {tid} op {i}: grow failed");
                    assert!(check_pattern(q, 100, seed), "grow lost content");

                    let r = unsafe { pool.realloc(q, 50) };
                    assert_eq!(r, q);
                    assert!(check_pattern(r, 50, seed), "shrink lost content");

                    unsafe { pool.free(r) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.destroy());
}

#[test]
fn concurrent_error_reads_do_not_block() {
    let settings = PoolSettings {
        total_size: 4 * 32,
        num_32_bytes_blocks: 4,
        threadsafe: true,
        ..PoolSettings::default()
    };
    let pool = Pool::create(&settings).unwrap();

    let writer = std::thread::spawn(move || {
        for _ in 0..1000 {
            let p = pool.malloc(16);
            if !p.is_null() {
                unsafe { pool.free(p) };
            }
        }
    });

    // Readers take no lock; they must make progress while the writer
    // churns.
    let reader = std::thread::spawn(move || {
        for _ in 0..1000 {
            let _ = pool.last_error_code();
            let _ = pool.last_error_message().len();
            assert_eq!(pool.settings().unwrap().num_32_bytes_blocks, 4);
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
    assert!(pool.destroy());
}
