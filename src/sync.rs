//! In-pool synchronization: a test-and-set lock over a word stored in the
//! pool's auxiliary record.
//!
//! `std::sync::Mutex` cannot be used here: the lock must live inside the
//! pool region itself (a pool is self-contained raw bytes) and the crate
//! supports `no_std`. The interface is fallible the way an OS mutex
//! wrapper is: a lock word holding anything but a valid state is reported
//! instead of trusted.

use core::sync::atomic::{AtomicUsize, Ordering};

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;

/// A lock or unlock operation failed because the lock word was corrupted
/// or the lock was not in the expected state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SyncError;

/// A raw test-and-set lock over a machine word owned by the pool.
pub(crate) struct PoolLock {
    word: *mut usize,
}

impl PoolLock {
    /// # Safety
    ///
    /// `word` must point to an aligned, live machine word (the lock word
    /// of a pool's auxiliary record) valid for the lifetime of this value.
    #[inline]
    pub(crate) unsafe fn from_word(word: *mut usize) -> Self {
        Self { word }
    }

    #[inline]
    fn atom(&self) -> &AtomicUsize {
        // SAFETY: the word is aligned and live per the from_word contract.
        unsafe { AtomicUsize::from_ptr(self.word) }
    }

    /// Put the word into the unlocked state.
    #[inline]
    pub(crate) fn init(&self) {
        self.atom().store(UNLOCKED, Ordering::Release);
    }

    /// Acquire the lock, spinning for as long as it takes. Fails only when
    /// the word holds a value that is not a lock state.
    pub(crate) fn lock(&self) -> Result<(), SyncError> {
        loop {
            match self.atom().compare_exchange_weak(
                UNLOCKED,
                LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(UNLOCKED) | Err(LOCKED) => core::hint::spin_loop(),
                Err(_) => return Err(SyncError),
            }
        }
    }

    /// Release the lock. Fails when the word was not in the locked state.
    pub(crate) fn unlock(&self) -> Result<(), SyncError> {
        self.atom()
            .compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| SyncError)
    }
}
