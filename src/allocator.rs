// =============================================================================
// CoHeap — Allocation engine
// =============================================================================
//
// This is the front door every other module builds toward: `try_allocate`,
// `try_free`, `try_calloc`, and `try_realloc` implement the size-class
// selection, superblock search, CPU-heap/global-heap handoff, and
// reclamation migration described in SPEC_FULL.md §4. `ffi.rs` collapses
// these `Result`s to C's null-on-failure convention; `CpuHeapAllocator`
// below exposes the same engine as a `GlobalAlloc` for Rust callers.
//
// Lock ordering is enforced structurally, not by convention: every path that
// needs both a CPU-heap class lock and the global heap's class lock acquires
// the CPU-heap one first, mirroring the teacher's own rule of thumb for its
// two-level lock nesting (frame allocator lock, then the per-region lock it
// protects, never the reverse).
// =============================================================================

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::block::{self, BlockHeader};
use crate::config;
use crate::errors::{AllocError, AllocResult};
use crate::heap;
use crate::page_source;
use crate::size_class::{self, SizeClass};
use crate::superblock::{self, Superblock};

/// Maps a requested size to the size class that serves it. Zero-byte
/// requests are treated as one byte, matching the worked example in
/// SPEC_FULL.md §9; requests are clamped to `MIN_CLASS` rather than computed
/// class indices below it, since sub-8-byte classes would waste more header
/// space than they'd ever save in payload.
fn class_index_for_size(sz: usize) -> u32 {
    let sz = if sz == 0 { 1 } else { sz };
    let c = sz.next_power_of_two().trailing_zeros();
    c.max(config::MIN_CLASS)
}

fn is_large(sz: usize) -> bool {
    sz > config::LARGE_THRESHOLD
}

/// Allocates a large block directly from the page source, bypassing
/// superblocks entirely (SPEC_FULL.md §4.6).
fn allocate_large(sz: usize) -> AllocResult<*mut u8> {
    let total = sz.checked_add(block::HEADER_SIZE).ok_or(AllocError::Overflow)?;
    let (region, _mapped_len) = page_source::fetch(total)?;
    let header = unsafe { block::init_large_block(region, sz) };
    log::trace!("coheap: large allocation of {sz} bytes via page source");
    Ok(block::payload_of(header))
}

/// Allocates a superblock's worth of memory from the page source and
/// initializes it for `class_index`, owned by `owning_heap`.
fn fetch_fresh_superblock(class_index: u32, owning_heap: usize) -> AllocResult<*mut Superblock> {
    let (region, mapped_len) = page_source::fetch(config::SB_SIZE)?;
    debug_assert_eq!(mapped_len, config::SB_SIZE, "SB_SIZE should already be page-aligned");
    let sb = unsafe { superblock::init(region, class_index, owning_heap) };
    log::debug!(
        "coheap: fetched fresh superblock for class {class_index} (heap {owning_heap})"
    );
    Ok(sb)
}

/// Pops a block from `sb` (which the caller has just verified or installed
/// with a free slot) and folds the new allocation into `class_guard`'s
/// stats, all under the same class-lock acquisition that found or installed
/// `sb` — see `allocate_small`'s doc comment for why this must not be split
/// into two separate lock acquisitions.
///
/// Caller must hold the lock guarding `class_guard`.
fn alloc_from(class_guard: &mut size_class::ClassState, sb: *mut Superblock) -> *mut u8 {
    let header = unsafe { superblock::alloc_block(sb) };
    debug_assert!(
        !header.is_null(),
        "sb must still have a free slot while its class lock is held continuously"
    );
    class_guard.used_blocks += 1;
    unsafe { size_class::bubble_toward_head(class_guard, sb) };
    block::payload_of(header)
}

/// Attempts to satisfy `sz` from the CPU heap's own superblocks, the global
/// heap's spare superblocks, or a fresh superblock, in that order.
///
/// Every branch installs (or finds) a superblock and allocates from it under
/// one continuous hold of the CPU-class lock. A superblock that is
/// `push_front`ed into a class's list becomes visible to every other thread
/// that can lock that class — releasing the lock between installing it and
/// popping a block from it would let a concurrent allocator steal the same
/// (possibly single-slot) block first, leaving this thread to call
/// `alloc_block` on an already-full superblock and hand out a bogus pointer
/// built from a null header. The only call that may run without the
/// CPU-class lock held is the page-source fetch for a fresh superblock,
/// which happens before the superblock exists or is visible to anyone.
fn allocate_small(class_index: u32) -> AllocResult<*mut u8> {
    let cpu_heap = heap::current_cpu_heap();
    let cpu_class = &cpu_heap.classes[class_index as usize];

    // Fast path: our own heap already has room.
    {
        let mut cpu_guard = cpu_class.lock.lock();
        let sb = unsafe { size_class::find_superblock_with_free_slot(&cpu_guard) };
        if !sb.is_null() {
            return Ok(alloc_from(&mut cpu_guard, sb));
        }
    }

    // Our heap is out of room in this class; see if the global heap has a
    // superblock to spare before minting a new one. CPU-class lock is taken
    // first and held for the rest of this branch, per SPEC_FULL.md §5's
    // CPU-before-global ordering.
    let global_heap = heap::global_heap();
    let global_class = &global_heap.classes[class_index as usize];
    {
        let mut cpu_guard = cpu_class.lock.lock();
        let mut global_guard = global_class.lock.lock();
        let sb = unsafe { size_class::find_superblock_with_free_slot(&global_guard) };
        if !sb.is_null() {
            unsafe { size_class::unlink(&mut global_guard, sb) };
            {
                let _sb_guard = unsafe { (*sb).lock.lock() };
                unsafe { (*sb).owning_heap = cpu_heap.id };
            }
            drop(global_guard);
            // Inserted at head, then bubbled toward its sorted position: the
            // CPU heap's existing superblocks may already be fuller than the
            // one we just pulled in (SPEC_FULL.md §4.7, "Migration of sb").
            unsafe { size_class::push_front(&mut cpu_guard, sb) };
            unsafe { size_class::settle_toward_tail(&mut cpu_guard, sb) };
            log::debug!(
                "coheap: migrated superblock for class {class_index} from global heap to heap {}",
                cpu_heap.id
            );
            return Ok(alloc_from(&mut cpu_guard, sb));
        }
    }

    // Still nothing to steal: mint a fresh superblock. The page-source call
    // can block, so it runs with no locks held and before the superblock is
    // visible to anyone; the CPU-class lock is then acquired once and held
    // through both installation and allocation.
    let sb = fetch_fresh_superblock(class_index, cpu_heap.id)?;
    let mut cpu_guard = cpu_class.lock.lock();
    unsafe { size_class::push_front(&mut cpu_guard, sb) };
    Ok(alloc_from(&mut cpu_guard, sb))
}

/// Allocates `sz` usable bytes, returning a pointer to the payload.
pub fn try_allocate(sz: usize) -> AllocResult<*mut u8> {
    if is_large(sz) {
        return allocate_large(sz);
    }
    let class_index = class_index_for_size(sz);
    allocate_small(class_index)
}

/// Frees a pointer previously returned by `try_allocate`/`try_calloc`/
/// `try_realloc`.
///
/// # Safety
/// `ptr` must be a live payload pointer this allocator handed out.
pub unsafe fn try_free(ptr: *mut u8) {
    let header = unsafe { block::header_of(ptr) };
    let sb = unsafe { (*header).owning_superblock };

    if sb.is_null() {
        let mapped_len = page_source::round_up_to_page(block::HEADER_SIZE + unsafe { (*header).block_size });
        unsafe { page_source::release(header as *mut u8, mapped_len) };
        return;
    }

    free_small(sb, header);
}

/// Frees a block belonging to a superblock, applying the lock-coupling
/// handoff and reclamation check from SPEC_FULL.md §4.3/§9.
fn free_small(sb: *mut Superblock, header: *mut BlockHeader) {
    // Acquire the superblock's own lock first, hold it across discovering
    // and locking the owning class, then release it — this is the handoff
    // window the superblock lock exists for: without it, a concurrent
    // migration could change `owning_heap` between our read and our
    // acquiring the (now wrong) class's lock.
    let sb_guard = unsafe { (*sb).lock.lock() };
    let owning_heap_id = unsafe { (*sb).owning_heap };
    let heap = heap::table().heap(owning_heap_id);
    let class_index = unsafe { (*header).block_size }.trailing_zeros();
    let class = &heap.classes[class_index as usize];

    let mut class_guard = class.lock.lock();
    drop(sb_guard);

    unsafe { superblock::free_block(sb, header) };
    class_guard.used_blocks -= 1;
    unsafe { size_class::bubble_toward_tail(&mut class_guard, sb) };

    if owning_heap_id != config::GLOBAL_HEAP {
        maybe_reclaim(owning_heap_id, class, &mut class_guard, class_index);
    }
}

/// Checks the reclamation predicate for a CPU heap's class and, if it
/// triggers, migrates the emptiest superblock in the class to the global
/// heap (SPEC_FULL.md §4.5).
fn maybe_reclaim(
    owning_heap_id: usize,
    class: &SizeClass,
    class_guard: &mut size_class::ClassState,
    class_index: u32,
) {
    let candidate = unsafe { size_class::emptiest_superblock(class_guard) };
    if candidate.is_null() {
        return;
    }
    let blocks_per_sb = unsafe { (*candidate).total_count };
    if !size_class::should_reclaim(class_guard.used_blocks, class_guard.total_blocks, blocks_per_sb) {
        return;
    }

    let global_heap = heap::global_heap();
    let global_class = &global_heap.classes[class_index as usize];

    // Ordering preserved: we already hold the CPU-class lock (`class_guard`
    // is that guard), and now take the global-class lock nested inside it.
    let mut global_guard = global_class.lock.lock();
    unsafe { size_class::unlink(class_guard, candidate) };
    {
        let _sb_guard = unsafe { (*candidate).lock.lock() };
        unsafe { (*candidate).owning_heap = config::GLOBAL_HEAP };
    }
    // Same head-insert-then-bubble restoration as the global-to-CPU transfer
    // above; the global heap may already hold superblocks fuller than this one.
    unsafe { size_class::push_front(&mut global_guard, candidate) };
    unsafe { size_class::settle_toward_tail(&mut global_guard, candidate) };

    log::debug!(
        "coheap: reclaimed superblock for class {class_index} from heap {owning_heap_id} to global heap"
    );
}

/// Allocates `n * sz` zero-filled bytes, checking for multiplication
/// overflow (`AllocError::Overflow`).
pub fn try_calloc(n: usize, sz: usize) -> AllocResult<*mut u8> {
    let total = n.checked_mul(sz).ok_or(AllocError::Overflow)?;
    let ptr = try_allocate(total)?;
    unsafe { ptr::write_bytes(ptr, 0, total) };
    Ok(ptr)
}

/// Reallocates `ptr` (previously obtained from this allocator) to hold at
/// least `new_size` bytes, preserving the lesser of the old and new sizes of
/// content. Always allocates a fresh block and copies; no in-place growth.
///
/// # Safety
/// `ptr` must be a live payload pointer this allocator handed out, or null.
pub unsafe fn try_realloc(ptr: *mut u8, new_size: usize) -> AllocResult<*mut u8> {
    if ptr.is_null() {
        return try_allocate(new_size);
    }
    if new_size == 0 {
        unsafe { try_free(ptr) };
        return Ok(ptr::null_mut());
    }

    let header = unsafe { block::header_of(ptr) };
    let old_size = unsafe { (*header).block_size };

    let new_ptr = try_allocate(new_size)?;
    let copy_len = old_size.min(new_size);
    unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };
    unsafe { try_free(ptr) };
    Ok(new_ptr)
}

/// `core::alloc::GlobalAlloc` front door, for Rust code that wants this
/// allocator as its `#[global_allocator]` rather than linking against the
/// `malloc`-family symbols in `ffi.rs`.
///
/// Known limitation: alignment above each size class's natural power-of-two
/// alignment is not separately honored. Every class from `MIN_CLASS` up
/// guarantees at least 8-byte alignment, which covers the overwhelming
/// majority of `Layout`s Rust's collections request; a `Layout` demanding a
/// stricter alignment than its size would not be satisfied correctly.
pub struct CpuHeapAllocator;

unsafe impl GlobalAlloc for CpuHeapAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        try_allocate(layout.size()).unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { try_free(ptr) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { try_realloc(ptr, new_size) }.unwrap_or(ptr::null_mut())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        match try_allocate(layout.size()) {
            Ok(p) => {
                unsafe { ptr::write_bytes(p, 0, layout.size()) };
                p
            }
            Err(_) => ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn small_allocation_round_trips_and_is_writable() {
        let ptr = try_allocate(48).expect("allocate should succeed");
        assert!(!ptr.is_null());
        unsafe {
            ptr::write_bytes(ptr, 0xAB, 48);
            assert_eq!(*ptr, 0xAB);
            try_free(ptr);
        }
    }

    #[test]
    fn large_allocation_bypasses_superblocks() {
        let sz = config::LARGE_THRESHOLD + 1;
        let ptr = try_allocate(sz).expect("large allocate should succeed");
        assert!(!ptr.is_null());
        unsafe {
            let header = block::header_of(ptr);
            assert!((*header).owning_superblock.is_null());
            try_free(ptr);
        }
    }

    #[test]
    fn calloc_zero_fills_requested_memory() {
        let ptr = try_calloc(16, 4).expect("calloc should succeed");
        unsafe {
            let slice = core::slice::from_raw_parts(ptr, 64);
            assert!(slice.iter().all(|&b| b == 0));
            try_free(ptr);
        }
    }

    #[test]
    fn calloc_rejects_overflowing_product() {
        assert_eq!(try_calloc(usize::MAX, 2), Err(AllocError::Overflow));
    }

    #[test]
    fn realloc_preserves_prefix_and_grows() {
        unsafe {
            let ptr = try_allocate(8).unwrap();
            ptr::write_bytes(ptr, 0x7, 8);
            let grown = try_realloc(ptr, 256).unwrap();
            let slice = core::slice::from_raw_parts(grown, 8);
            assert!(slice.iter().all(|&b| b == 0x7));
            try_free(grown);
        }
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        unsafe {
            let ptr = try_allocate(8).unwrap();
            let result = try_realloc(ptr, 0).unwrap();
            assert!(result.is_null());
        }
    }

    #[test]
    fn concurrent_allocations_from_distinct_threads_never_alias() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    let mut ptrs = Vec::new();
                    for _ in 0..200 {
                        let p = try_allocate(32).unwrap();
                        ptrs.push(p as usize);
                    }
                    for &p in &ptrs {
                        unsafe { try_free(p as *mut u8) };
                    }
                    ptrs
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for p in h.join().unwrap() {
                // addresses were freed so reuse across threads is expected;
                // just exercise the path concurrently without crashing.
                all.insert(p);
            }
        }
        assert!(!all.is_empty());
    }

    /// Exercises the reclamation predicate end to end: force a second
    /// superblock into one CPU heap's class, then free enough of it to fall
    /// under `F = 2/5`, and check that `maybe_reclaim` actually migrates a
    /// superblock to the global heap rather than just computing a predicate
    /// nobody acts on. Needs `heap::current_cpu_heap`/`global_heap` and the
    /// `ClassState`/`Superblock` internals, so it lives here rather than in
    /// the public-API-only `tests/scenarios.rs`.
    ///
    /// `SZ` is a size used by no other test in this file or in
    /// `tests/scenarios.rs`, so this test's class is never touched by
    /// concurrently running tests.
    #[test]
    fn free_storm_in_one_class_migrates_superblock_to_global_and_keeps_it_mapped() {
        const SZ: usize = 2048;
        let class_index = class_index_for_size(SZ);
        let cpu_heap = heap::current_cpu_heap();
        let global_heap = heap::global_heap();
        let cpu_class = &cpu_heap.classes[class_index as usize];
        let global_class = &global_heap.classes[class_index as usize];

        let total_before_growth = cpu_class.lock.lock().total_blocks;
        let global_before = global_class.lock.lock().total_blocks;

        // Keep allocating in this class until a second superblock gets
        // minted into this CPU heap, so there is a spare one for the free
        // storm below to migrate away.
        let mut live = Vec::new();
        loop {
            live.push(try_allocate(SZ).expect("allocate should succeed"));
            if cpu_class.lock.lock().total_blocks > total_before_growth {
                break;
            }
            assert!(live.len() < 1_000_000, "never minted a second superblock for class {class_index}");
        }
        let total_at_peak = cpu_class.lock.lock().total_blocks;
        assert!(total_at_peak > total_before_growth);

        // Free all but one block. Driving used/total under F = 2/5 should
        // trip `should_reclaim` and migrate the emptiest superblock away.
        let survivor = live.pop().unwrap();
        for p in live {
            unsafe { try_free(p) };
        }

        let total_after = cpu_class.lock.lock().total_blocks;
        let global_after = global_class.lock.lock().total_blocks;
        assert!(
            total_after < total_at_peak,
            "reclamation should have migrated at least one superblock out of the CPU heap's class"
        );
        assert!(
            global_after > global_before,
            "the migrated superblock should now be listed in the global heap's class"
        );

        // The migrated superblock was never released to the page source,
        // only relisted — reading its fields here, rather than crashing on
        // unmapped memory, is the proof. Every superblock in the global
        // class must still satisfy the free-list length invariant
        // (SPEC_FULL.md §8 property 3).
        unsafe {
            let guard = global_class.lock.lock();
            let mut cur = guard.head;
            let mut visited = 0;
            while !cur.is_null() {
                let mut free_len = 0usize;
                let mut f = (*cur).free_list_head;
                while !f.is_null() {
                    free_len += 1;
                    f = (*f).next_in_free_list;
                }
                assert_eq!((*cur).used_count + free_len, (*cur).total_count);
                visited += 1;
                cur = (*cur).next;
            }
            assert!(visited > 0, "global heap's class should list at least one superblock");
        }

        // The one block kept alive throughout — possibly itself inside the
        // superblock that just migrated — is still valid and writable.
        unsafe {
            ptr::write_bytes(survivor, 0x77, SZ);
            assert_eq!(*survivor, 0x77);
            try_free(survivor);
        }
    }
}
