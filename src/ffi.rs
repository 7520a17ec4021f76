// =============================================================================
// CoHeap — C ABI surface
// =============================================================================
//
// These four symbols are the entire external interface a linker sees: a
// binary built with `-lcoheap` (or an `LD_PRELOAD` of the compiled
// `cdylib`) gets this allocator wherever it calls `malloc`/`free`/`calloc`/
// `realloc`. Everything above this module speaks `Result`; this module's
// only job is collapsing that `Result` to C's "null means failure"
// convention at the boundary, the same shape as the teacher's
// `#[alloc_error_handler]` sitting at the edge of its own `Result`-returning
// heap (`memory::heap::Heap::allocate`).
// =============================================================================

use core::ffi::c_void;
use core::ptr;

use crate::allocator;

/// # Safety
/// Same contract as libc's `malloc`: `size` may be zero (a valid, unique,
/// freeable pointer is returned); any other value is a request for that many
/// usable bytes.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    match allocator::try_allocate(size) {
        Ok(ptr) => ptr as *mut c_void,
        Err(e) => {
            log::warn!("coheap: malloc({size}) failed: {e}");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `ptr` must be null, or a pointer previously returned by `malloc`,
/// `calloc`, or `realloc` from this allocator that has not already been
/// freed.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    unsafe { allocator::try_free(ptr as *mut u8) };
}

/// # Safety
/// Same contract as libc's `calloc`: returns `nmemb * size` zero-filled
/// bytes, or null (without allocating) if the product overflows `usize` or
/// the allocation itself fails.
#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match allocator::try_calloc(nmemb, size) {
        Ok(ptr) => ptr as *mut c_void,
        Err(e) => {
            log::warn!("coheap: calloc({nmemb}, {size}) failed: {e}");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `ptr` must be null, or a pointer previously returned by `malloc`,
/// `calloc`, or `realloc` from this allocator that has not already been
/// freed. On success the input pointer is no longer valid; on failure it is
/// left untouched, matching libc's `realloc` contract.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    match unsafe { allocator::try_realloc(ptr as *mut u8, size) } {
        Ok(new_ptr) => new_ptr as *mut c_void,
        Err(e) => {
            log::warn!("coheap: realloc({ptr:p}, {size}) failed: {e}");
            ptr::null_mut()
        }
    }
}
