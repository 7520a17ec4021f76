// =============================================================================
// CoHeap — Heap table
// =============================================================================
//
// There are `config::HEAPS` heaps: one per CPU heap index plus one global
// heap at `config::GLOBAL_HEAP`. Each heap is just an array of size classes
// indexed by class index. The table is process-wide state, built once on
// first use and never torn down — the same "construct once, live for the
// rest of the process" shape as the teacher's `pmm::BitmapAllocator`, which
// is also guarded by a lock around an `Option` populated on first call rather
// than at static-init time (SPEC_FULL.md §9, "Process-wide initialization").
//
// `spin::Once` is used instead of the teacher's hand-rolled
// lock-around-`Option` because this allocator has no single bootstrap thread
// to rely on: any number of threads can race to be the first caller.
// `Once::call_once` gives single-execution-with-a-barrier for free.
// =============================================================================

use spin::Once;

use crate::config::{CLASSES, HEAPS};
use crate::size_class::SizeClass;

pub struct Heap {
    pub id: usize,
    pub classes: [SizeClass; CLASSES],
}

impl Heap {
    fn new(id: usize) -> Self {
        Self {
            id,
            classes: core::array::from_fn(|c| SizeClass::new(c as u32)),
        }
    }
}

pub struct HeapTable {
    heaps: [Heap; HEAPS],
}

impl HeapTable {
    fn new() -> Self {
        Self {
            heaps: core::array::from_fn(Heap::new),
        }
    }

    pub fn heap(&self, index: usize) -> &Heap {
        &self.heaps[index]
    }
}

static TABLE: Once<HeapTable> = Once::new();

/// Returns the process-wide heap table, building it on the first call from
/// any thread.
pub fn table() -> &'static HeapTable {
    TABLE.call_once(HeapTable::new)
}

/// Returns the CPU heap the calling thread should use.
pub fn current_cpu_heap() -> &'static Heap {
    let idx = crate::thread_id::cpu_heap_index(crate::config::CPUS);
    table().heap(idx)
}

/// Returns the single shared global heap.
pub fn global_heap() -> &'static Heap {
    table().heap(crate::config::GLOBAL_HEAP)
}
