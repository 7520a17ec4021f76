// =============================================================================
// CoHeap — Page source adapter
// =============================================================================
//
// The page source is an external collaborator by design (SPEC_FULL.md §1):
// the allocator core only ever calls `fetch`/`release` and never reasons
// about how pages are actually obtained. The teacher's equivalent collaborator
// is its bitmap-based PMM (`memory::pmm`) sitting behind a `fetch a frame` /
// `free a frame` API; the same shape here, but there is no bootloader memory
// map to bootstrap from, because this rewrite targets a hosted process
// instead of bare metal. Pages come straight from the kernel via
// `mmap`/`munmap`, the way the `rallocator` malloc-replacement crate
// (examples/other_examples) sources memory with `libc` rather than through
// `std`'s allocator-dependent wrappers.
//
// The adapter is intentionally stateless beyond a cached page size: it does
// not track which regions it has handed out (that bookkeeping belongs to the
// superblock/size-class machine, not to the OS-facing layer).
// =============================================================================

use core::ptr;

use crate::errors::{AllocError, AllocResult};

/// Returns the system's page size, queried once and reused. `mmap` lengths
/// are always rounded up to a whole number of pages by the kernel regardless,
/// but rounding explicitly here keeps `fetch`'s contract ("at least `n`
/// bytes, zero-filled, page-aligned") true of the *requested* length too.
fn page_size() -> usize {
    use core::sync::atomic::{AtomicUsize, Ordering};
    static CACHED: AtomicUsize = AtomicUsize::new(0);
    let cached = CACHED.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf with _SC_PAGESIZE has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let sz = if sz > 0 { sz as usize } else { 4096 };
    CACHED.store(sz, Ordering::Relaxed);
    sz
}

#[inline]
pub(crate) fn round_up_to_page(n: usize) -> usize {
    let ps = page_size();
    (n + ps - 1) & !(ps - 1)
}

/// Obtains a fresh, zero-filled, page-aligned region of at least `n` bytes
/// from the OS. Returns the actual size mapped (always a multiple of the
/// page size and `>= n`) alongside the base pointer, since `release` must be
/// called with the same length `mmap` actually mapped.
///
/// Anonymous `MAP_PRIVATE` pages are zero-filled by the kernel, so no
/// explicit memset is needed to satisfy the "zero-filled" half of the
/// contract.
pub fn fetch(n: usize) -> AllocResult<(*mut u8, usize)> {
    if n == 0 {
        return Err(AllocError::Overflow);
    }
    let mapped_len = round_up_to_page(n);

    // SAFETY: standard anonymous-mapping mmap call; the returned pointer is
    // only ever used as an opaque base address by callers, who already know
    // its length (`mapped_len`) and must pass it back unchanged to `release`.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            mapped_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(AllocError::PageSourceExhausted);
    }

    Ok((ptr as *mut u8, mapped_len))
}

/// Releases a region previously returned by `fetch`. `ptr` and `len` must be
/// exactly the base and mapped length `fetch` returned — `munmap`'s contract,
/// passed straight through.
///
/// # Safety
/// `ptr` must point to a region of `len` bytes obtained from `fetch` and not
/// already released.
pub unsafe fn release(ptr: *mut u8, len: usize) {
    unsafe {
        libc::munmap(ptr as *mut libc::c_void, len);
    }
}
