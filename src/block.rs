// =============================================================================
// CoHeap — Block header & intra-superblock free list
// =============================================================================
//
// Every small allocation is preceded by a `BlockHeader` stamped in-line, the
// same "header immediately before the payload" layout the teacher's kernel
// heap uses for its `FreeBlock` node (`memory::heap::FreeBlock`). The
// difference is what the header tracks: the teacher's free-list allocator
// only needs a free block's own size and a next pointer, because its blocks
// are variable-sized and coalesce on free. This allocator's blocks are fixed
// size per size class and never coalesce — instead a block always remembers
// its owning superblock, so `free` can find the superblock (and from there
// the owning heap and class) from the pointer alone.
// =============================================================================

use core::mem::size_of;
use core::ptr;

use crate::superblock::Superblock;

/// In-line metadata stamped immediately before every block's payload.
///
/// Large blocks (obtained straight from the page source, see
/// `allocator::allocate_large`) use this same header shape with
/// `owning_superblock` null and `block_size` set to the requested size
/// rather than a power of two.
#[repr(C)]
pub struct BlockHeader {
    /// Size of the *usable* payload in bytes: `2^c` for a small block, or the
    /// exact requested size for a large block.
    pub block_size: usize,
    /// `true` while handed to the caller; `false` while sitting on a free
    /// list. Checked by the testable-property suite, not by the hot path.
    pub in_use: bool,
    /// Next block on this superblock's free list, or null. Unused (and left
    /// null) for large blocks.
    pub next_in_free_list: *mut BlockHeader,
    /// Back-pointer to the owning superblock. Null for large blocks, which
    /// have no superblock.
    pub owning_superblock: *mut Superblock,
}

pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Returns the payload pointer for a block whose header starts at `header`.
#[inline]
pub fn payload_of(header: *mut BlockHeader) -> *mut u8 {
    unsafe { (header as *mut u8).add(HEADER_SIZE) }
}

/// Recovers the block header for a payload pointer previously returned to a
/// caller. `ptr` must have come from this allocator.
///
/// # Safety
/// `ptr` must be a payload pointer this allocator handed out and must not
/// already have been freed.
#[inline]
pub unsafe fn header_of(ptr: *mut u8) -> *mut BlockHeader {
    unsafe { ptr.sub(HEADER_SIZE) as *mut BlockHeader }
}

/// Stamps a fresh block header at `addr` for a small allocation belonging to
/// `owner`, with `block_size` usable bytes following the header.
///
/// # Safety
/// `addr` must point to at least `HEADER_SIZE + block_size` writable bytes.
pub unsafe fn init_small_block(
    addr: *mut u8,
    block_size: usize,
    owner: *mut Superblock,
    next: *mut BlockHeader,
) -> *mut BlockHeader {
    let header = addr as *mut BlockHeader;
    unsafe {
        ptr::write(
            header,
            BlockHeader {
                block_size,
                in_use: false,
                next_in_free_list: next,
                owning_superblock: owner,
            },
        );
    }
    header
}

/// Stamps a fresh block header at `addr` for a large allocation (no owning
/// superblock, not part of any free list).
///
/// # Safety
/// `addr` must point to at least `HEADER_SIZE + block_size` writable bytes.
pub unsafe fn init_large_block(addr: *mut u8, block_size: usize) -> *mut BlockHeader {
    let header = addr as *mut BlockHeader;
    unsafe {
        ptr::write(
            header,
            BlockHeader {
                block_size,
                in_use: true,
                next_in_free_list: ptr::null_mut(),
                owning_superblock: ptr::null_mut(),
            },
        );
    }
    header
}
