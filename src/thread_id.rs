// =============================================================================
// CoHeap — Thread identity source
// =============================================================================
//
// An external collaborator by design: the core only needs a cheap,
// deterministic-per-call integer to route a thread to a CPU heap (SPEC_FULL.md
// §4.8/§9). The teacher reads a similar per-execution-context integer via
// `arch::smp::core_id()` — a single GS-relative load of the running core's
// id, re-read on every call rather than cached, so code stays oblivious to a
// task migrating cores between reads. This is the userspace analogue: each
// OS thread is handed a small sequential integer the first time it calls
// into the allocator, cached in a thread-local cell, and read (not
// recomputed) on every later call.
// =============================================================================

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THIS_THREAD_ID: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Returns a stable integer identifying the calling thread, assigning one on
/// first use. Cheap: a thread-local read on every call after the first.
///
/// This id has no relationship to the OS thread id or scheduler CPU — it
/// only needs to be deterministic for the lifetime of the calling thread and
/// well distributed enough for `id % CPUS` to spread threads across heaps.
pub fn current() -> u32 {
    THIS_THREAD_ID.with(|cell| match cell.get() {
        Some(id) => id,
        None => {
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(Some(id));
            id
        }
    })
}

/// Hashes a thread identity down to a CPU heap index in `[0, cpus)`.
///
/// A plain modulo is enough here — `current()` already hands out sequential
/// integers, so consecutive threads land on consecutive heaps without needing
/// a mixing step.
#[inline]
pub fn cpu_heap_index(cpus: usize) -> usize {
    (current() as usize) % cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn id_is_stable_within_a_thread() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_threads_get_distinct_ids() {
        let (tx, rx) = mpsc::channel();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tx = tx.clone();
                thread::spawn(move || tx.send(current()).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        drop(tx);
        let ids: HashSet<u32> = rx.iter().collect();
        assert_eq!(ids.len(), 16);
    }
}
