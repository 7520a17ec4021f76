// =============================================================================
// CoHeap — Superblock
// =============================================================================
//
// A superblock is a fixed `SB_SIZE` region carved at init time into equal
// slots of one size class, mirroring the way the teacher's kernel heap carves
// a single mmap'd region into a free list (`memory::heap::Heap::init`) — the
// difference is that a superblock's slots are all the same fixed power-of-two
// size and never coalesce, because coalescing across size classes has no
// meaning here; a block only ever returns to its own class's free list.
//
// Superblocks are linked into a doubly-linked, fullness-sorted list owned by
// a size class (see `size_class.rs`). The list pointers and the `owning_heap`
// back-pointer are back-references for lookup, not ownership — the class
// that currently lists a superblock is the only thing that may mutate its
// `used_count`/free list/`prev`/`next`, under that class's lock. `owning_heap`
// additionally requires the superblock's own lock while being read or written
// across the free-path handoff (SPEC_FULL.md §9, "Lock coupling during free").
// =============================================================================

use core::mem::size_of;
use core::ptr;

use crate::block::{self, BlockHeader, HEADER_SIZE};
use crate::config::SB_SIZE;
use crate::sync::SpinLock;

#[repr(C)]
pub struct Superblock {
    pub used_count: usize,
    pub total_count: usize,
    pub free_list_head: *mut BlockHeader,
    /// Guards only the identity of `owning_heap` during the free-path
    /// handoff; everything else here is guarded by the owning class's lock.
    pub lock: SpinLock<()>,
    pub prev: *mut Superblock,
    pub next: *mut Superblock,
    pub owning_heap: usize,
}

pub const HEADER_SIZE_SB: usize = size_of::<Superblock>();

/// Computes how many `2^class_index`-byte blocks fit in a superblock, each
/// preceded by its own `BlockHeader`, after the superblock's own header.
pub fn blocks_per_superblock(class_index: u32) -> usize {
    let block_size = 1usize << class_index;
    let slot = HEADER_SIZE + block_size;
    (SB_SIZE - HEADER_SIZE_SB) / slot
}

/// Initializes a freshly fetched `SB_SIZE` region as a superblock for
/// `class_index`, owned by `owning_heap`. Lays out `total_count` blocks
/// contiguously after the header, linked through their free lists in address
/// order, and leaves `used_count == 0`.
///
/// # Safety
/// `region` must point to exactly `SB_SIZE` writable, otherwise-unused bytes.
pub unsafe fn init(region: *mut u8, class_index: u32, owning_heap: usize) -> *mut Superblock {
    let block_size = 1usize << class_index;
    let total_count = blocks_per_superblock(class_index);
    debug_assert!(total_count > 0, "SB_SIZE too small for this class");

    let sb_ptr = region as *mut Superblock;
    unsafe {
        ptr::write(
            sb_ptr,
            Superblock {
                used_count: 0,
                total_count,
                free_list_head: ptr::null_mut(),
                lock: SpinLock::new(()),
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                owning_heap,
            },
        );
    }

    // Carve the blocks in address order, linking each to its successor so the
    // free list comes out in address order too (matches SPEC_FULL.md §4.2).
    let slots_base = unsafe { region.add(HEADER_SIZE_SB) };
    let slot_stride = HEADER_SIZE + block_size;

    let mut head: *mut BlockHeader = ptr::null_mut();
    for i in (0..total_count).rev() {
        let slot = unsafe { slots_base.add(i * slot_stride) };
        head = unsafe { block::init_small_block(slot, block_size, sb_ptr, head) };
    }
    unsafe {
        (*sb_ptr).free_list_head = head;
    }

    sb_ptr
}

/// Pops a free block from `sb`, marking it in-use and incrementing
/// `used_count`. Returns null if the superblock is already full.
///
/// # Safety
/// `sb` must be a valid, initialized superblock, and the caller must hold the
/// lock of the class that currently lists it.
pub unsafe fn alloc_block(sb: *mut Superblock) -> *mut BlockHeader {
    unsafe {
        let head = (*sb).free_list_head;
        if head.is_null() {
            return ptr::null_mut();
        }
        (*sb).free_list_head = (*head).next_in_free_list;
        (*head).next_in_free_list = ptr::null_mut();
        (*head).in_use = true;
        (*sb).used_count += 1;
        head
    }
}

/// Pushes `header` back onto `sb`'s free list, marking it free and
/// decrementing `used_count`.
///
/// # Safety
/// `sb` must be a valid, initialized superblock, `header` must be a block
/// belonging to it, and the caller must hold the lock of the class that
/// currently lists it.
pub unsafe fn free_block(sb: *mut Superblock, header: *mut BlockHeader) {
    unsafe {
        (*header).in_use = false;
        (*header).next_in_free_list = (*sb).free_list_head;
        (*sb).free_list_head = header;
        (*sb).used_count -= 1;
    }
}

/// Returns whether `sb` has at least one free slot.
///
/// # Safety
/// `sb` must be a valid, initialized superblock.
pub unsafe fn has_free_slot(sb: *mut Superblock) -> bool {
    unsafe { (*sb).used_count < (*sb).total_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_source;

    fn make_superblock(class_index: u32) -> *mut Superblock {
        let (region, len) = page_source::fetch(SB_SIZE).unwrap();
        assert_eq!(len, SB_SIZE.next_power_of_two().max(SB_SIZE));
        unsafe { init(region, class_index, 0) }
    }

    #[test]
    fn init_lays_out_full_free_list() {
        let sb = make_superblock(5); // 32-byte blocks
        unsafe {
            assert_eq!((*sb).used_count, 0);
            let total = (*sb).total_count;
            assert!(total > 0);

            let mut count = 0;
            let mut cur = (*sb).free_list_head;
            while !cur.is_null() {
                assert!(!(*cur).in_use);
                count += 1;
                cur = (*cur).next_in_free_list;
            }
            assert_eq!(count, total);
        }
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let sb = make_superblock(4); // 16-byte blocks
        unsafe {
            let total = (*sb).total_count;
            let mut taken = Vec::new();
            while has_free_slot(sb) {
                let b = alloc_block(sb);
                assert!(!b.is_null());
                assert!((*b).in_use);
                taken.push(b);
            }
            assert_eq!((*sb).used_count, total);
            assert!(alloc_block(sb).is_null());

            for b in taken {
                free_block(sb, b);
            }
            assert_eq!((*sb).used_count, 0);
        }
    }
}
