//! Pool-level layout: section offsets, typed section pointers, and the
//! memory requirement computation.
//!
//! A pool region is, in order: head sentinel, settings record, class
//! table, auxiliary record (each padded to [`ALIGN`]), the class block
//! regions in ascending data-size order, and the tail sentinel.

use crate::block::BLOCK_OVERHEAD;
use crate::class::ClassEntry;
use crate::config::NUM_CLASSES;
use crate::error::Aux;
use crate::poison::{align_up, POOL_HEAD};
use crate::settings::PoolSettings;
use crate::ALIGN;

/// Aligned size of the settings record.
pub(crate) const SETTINGS_SIZE: usize = align_up(core::mem::size_of::<PoolSettings>());
/// Aligned size of the class table.
pub(crate) const CLASS_TABLE_SIZE: usize =
    align_up(NUM_CLASSES * core::mem::size_of::<ClassEntry>());
/// Aligned size of the auxiliary record.
pub(crate) const AUX_SIZE: usize = align_up(core::mem::size_of::<Aux>());
/// All control bytes: both sentinels plus the three control sections.
pub(crate) const CONTROL_SIZE: usize = 2 * ALIGN + SETTINGS_SIZE + CLASS_TABLE_SIZE + AUX_SIZE;

pub(crate) const SETTINGS_OFFSET: usize = ALIGN;
pub(crate) const CLASS_TABLE_OFFSET: usize = SETTINGS_OFFSET + SETTINGS_SIZE;
pub(crate) const AUX_OFFSET: usize = CLASS_TABLE_OFFSET + CLASS_TABLE_SIZE;
pub(crate) const FIRST_BLOCK_OFFSET: usize = AUX_OFFSET + AUX_SIZE;

/// # Safety
///
/// `base` must be the base address of a live pool region.
#[inline]
pub(crate) unsafe fn settings_ptr(base: *mut u8) -> *mut PoolSettings {
    unsafe { base.add(SETTINGS_OFFSET) as *mut PoolSettings }
}

/// # Safety
///
/// `base` must be the base address of a live pool region.
#[inline]
pub(crate) unsafe fn classes_ptr(base: *mut u8) -> *mut ClassEntry {
    unsafe { base.add(CLASS_TABLE_OFFSET) as *mut ClassEntry }
}

/// # Safety
///
/// `base` must be the base address of a live pool region.
#[inline]
pub(crate) unsafe fn aux_ptr(base: *mut u8) -> *mut Aux {
    unsafe { base.add(AUX_OFFSET) as *mut Aux }
}

/// # Safety
///
/// `base` must be the base address of a live pool region.
#[inline]
pub(crate) unsafe fn first_block_ptr(base: *mut u8) -> *mut u8 {
    unsafe { base.add(FIRST_BLOCK_OFFSET) }
}

/// Whether `base` carries the pool head sentinel.
///
/// # Safety
///
/// `base` must be readable for at least [`ALIGN`] bytes.
#[inline]
pub(crate) unsafe fn is_pool(base: *const u8) -> bool {
    unsafe { core::slice::from_raw_parts(base, ALIGN) == POOL_HEAD }
}

/// Total backing bytes for a pool with these settings: control sections,
/// per-block metadata overhead, and the usable total size.
pub(crate) fn memory_requirements(settings: &PoolSettings) -> usize {
    CONTROL_SIZE + BLOCK_OVERHEAD * settings.total_blocks() + settings.total_size
}
