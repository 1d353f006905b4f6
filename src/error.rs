//! Error codes, the in-pool auxiliary record, and the error recorder.
//!
//! Errors are recorded on the pool itself (code plus a formatted message
//! in a fixed buffer, like `errno`/`strerror`), handed to the settings
//! callback, and — when a dump file is configured — appended to that file
//! together with a hex dump of the whole pool.

use core::fmt::Write;

use crate::config::ERROR_MESSAGE_SIZE;
use crate::layout;
use crate::stat_inc;

/// Everything that can go wrong on a pool call.
#[repr(usize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The last call succeeded.
    NoErr = 0,
    /// The caller-supplied total size disagrees with the per-class counts.
    InconsistentSettings = 1,
    /// A lock operation failed; the call was aborted.
    ThreadSyncError = 2,
    /// An output location is missing. Reserved for bindings that can pass
    /// null output parameters; the safe Rust surface cannot produce it.
    OutputParamError = 3,
    /// The handle does not point at a valid pool.
    InvalidMempool = 4,
    /// No class can satisfy the request (or the backing region could not
    /// be obtained at creation).
    NoMemory = 5,
    /// Corruption detected: a damaged sentinel, counter, or poison fill.
    Overflow = 6,
    /// Class bookkeeping out of sync; the class was forced to a saturated
    /// state.
    InconsistentBlocks = 7,
    /// The pointer is not a live payload of this pool.
    PointerParamError = 8,
}

impl ErrorCode {
    pub(crate) fn from_word(raw: usize) -> ErrorCode {
        match raw {
            1 => ErrorCode::InconsistentSettings,
            2 => ErrorCode::ThreadSyncError,
            3 => ErrorCode::OutputParamError,
            4 => ErrorCode::InvalidMempool,
            5 => ErrorCode::NoMemory,
            6 => ErrorCode::Overflow,
            7 => ErrorCode::InconsistentBlocks,
            8 => ErrorCode::PointerParamError,
            _ => ErrorCode::NoErr,
        }
    }
}

/// Base message recorded for [`ErrorCode::InconsistentSettings`].
pub const INCONSISTENT_SETTINGS_MSG: &str = "The mempool settings are inconsistent.";
/// Message returned for calls on a handle that is not a valid pool.
pub const NOT_A_MEMPOOL_MSG: &str = "The mempool is invalid.";
/// Base message recorded for [`ErrorCode::NoMemory`] on a full pool.
pub const NO_MEMORY_MSG: &str = "The mempool is full. Cannot allocate memory.";
/// Passed to the callback when the backing region cannot be obtained.
pub const CANNOT_CREATE_MSG: &str = "The mempool cannot be allocated.";
/// Base message recorded for [`ErrorCode::Overflow`].
pub const OVERFLOW_MSG: &str = "Memory overflow detected.";
/// Base message recorded for [`ErrorCode::InconsistentBlocks`].
pub const BLOCK_INCONSISTENCY_MSG: &str =
    "Inconsistency found in the data blocks management section.";
/// Base message recorded for [`ErrorCode::OutputParamError`].
pub const INVALID_OUTPUT_PARAM_MSG: &str = "Invalid output parameter.";
/// Recorded when the pool lock cannot be acquired.
pub const MUTEX_LOCK_MSG: &str = "Could not lock the threadsync mutex.";
/// Recorded when the pool lock cannot be released.
pub const MUTEX_UNLOCK_MSG: &str = "Could not unlock the threadsync mutex.";
/// Base message recorded for [`ErrorCode::PointerParamError`].
pub const INVALID_POINTER_PARAM_MSG: &str = "Invalid pointer input parameter.";

/// Auxiliary record, stored inside the pool between the class table and
/// the first block. Field order is part of the pool's binary layout.
#[repr(C)]
pub(crate) struct Aux {
    /// Lock word, accessed atomically through [`crate::sync::PoolLock`].
    pub lock_word: usize,
    /// Nonzero once the lock has been set up for a threadsafe pool.
    pub lock_initialized: usize,
    /// Last error code as a machine word.
    pub last_error: usize,
    /// Length of the valid prefix of `message`.
    pub message_len: usize,
    /// Last error message (UTF-8, zero-padded).
    pub message: [u8; ERROR_MESSAGE_SIZE],
}

/// Reset the last-error state. Done at the start of every mutating call.
///
/// # Safety
///
/// `aux` must point to the auxiliary record of a live pool.
pub(crate) unsafe fn clear_error(aux: *mut Aux) {
    unsafe {
        (*aux).last_error = ErrorCode::NoErr as usize;
        (*aux).message_len = 0;
        core::ptr::write_bytes((*aux).message.as_mut_ptr(), 0, ERROR_MESSAGE_SIZE);
    }
}

/// Record `code` on the pool: format the message (with the offending
/// location, when given), invoke the callback, and append to the dump
/// file when one is configured. Only the most recent error is retained.
///
/// # Safety
///
/// `base` must be the base address of a live pool.
pub(crate) unsafe fn record_error(
    base: *mut u8,
    code: ErrorCode,
    message: &str,
    location: Option<*const u8>,
) {
    let aux = unsafe { layout::aux_ptr(base) };
    let settings = unsafe { layout::settings_ptr(base) };

    unsafe {
        (*aux).last_error = code as usize;
        core::ptr::write_bytes((*aux).message.as_mut_ptr(), 0, ERROR_MESSAGE_SIZE);
    }

    let mut offset = None;
    let len = {
        let mut writer = FixedWriter {
            buf: unsafe { &mut (*aux).message },
            len: 0,
        };
        let _ = writer.write_str(message);
        if let Some(loc) = location {
            let off = loc as usize - base as usize;
            offset = Some(off);
            let _ = write!(
                writer,
                " (at the {:#x} location / {} mempool offset)",
                loc as usize, off
            );
        }
        writer.len
    };
    unsafe { (*aux).message_len = len };

    if code == ErrorCode::Overflow {
        stat_inc!(overflow_reports);
    }

    if let Some(callback) = unsafe { (*settings).error_callback } {
        // The buffer only ever holds what FixedWriter wrote: valid UTF-8.
        let msg =
            unsafe { core::str::from_utf8_unchecked(&(&(*aux).message)[..len]) };
        callback(code, msg);
    }

    #[cfg(feature = "std")]
    unsafe {
        dump_on_error(base, offset)
    };
}

/// `core::fmt::Write` into a fixed buffer; overflow is truncated on a
/// char boundary.
struct FixedWriter<'a> {
    buf: &'a mut [u8; ERROR_MESSAGE_SIZE],
    len: usize,
}

impl Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let available = self.buf.len() - self.len;
        let mut take = s.len().min(available);
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

#[cfg(feature = "std")]
unsafe fn dump_on_error(base: *mut u8, mark: Option<usize>) {
    use std::io::Write as _;

    let settings = unsafe { &*layout::settings_ptr(base) };
    let Some(name) = settings.dump_file_name() else {
        return;
    };

    let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(name) else {
        std::eprintln!("Error writing the error message in the mempool error dump file");
        return;
    };

    let aux = unsafe { layout::aux_ptr(base) };
    let len = unsafe { (*aux).message_len };
    let msg = unsafe { core::str::from_utf8_unchecked(&(&(*aux).message)[..len]) };

    let _ = writeln!(file);
    let _ = writeln!(file, "{}", msg);
    unsafe { dump_pool(base, layout::memory_requirements(settings), &mut file, mark) };
    let _ = file.flush();
}

/// Write the whole pool as hex, [`crate::ALIGN`] bytes per line, marking
/// the byte at `mark` when given.
///
/// # Safety
///
/// `base..base + size` must be a live pool region.
#[cfg(feature = "std")]
pub(crate) unsafe fn dump_pool(
    base: *const u8,
    size: usize,
    out: &mut dyn std::io::Write,
    mark: Option<usize>,
) {
    use crate::ALIGN;

    let _ = write!(
        out,
        "Mempool dump at location {:#x} ({} lines)",
        base as usize,
        size / ALIGN
    );
    for i in 0..size {
        if i % ALIGN == 0 {
            let _ = write!(out, "\n{}: ", i / ALIGN);
        }
        let byte = unsafe { *base.add(i) };
        if mark == Some(i) {
            let _ = write!(out, " (!!!MARK POINT!!!){:02x}", byte);
        } else {
            let _ = write!(out, " {:02x}", byte);
        }
    }
    let _ = writeln!(out);
}
