// =============================================================================
// CoHeap — Compile-time configuration
// =============================================================================
//
// Every tunable in this allocator is a compile-time constant. There is no
// runtime configuration surface: no files, no environment variables, no
// init-time parameters. This mirrors the teacher's own stance on kernel
// tunables (MAX_CORES, INITIAL_HEAP_PAGES, ...): a value that needs to change
// per deployment gets a new build, not a new code path.
// =============================================================================

/// Number of per-CPU heaps. The global heap is one more than this.
pub const CPUS: usize = 8;

/// Total number of heaps: one per CPU, plus the global heap at index `CPUS`.
pub const HEAPS: usize = CPUS + 1;

/// Index of the global heap within the heap table.
pub const GLOBAL_HEAP: usize = CPUS;

/// Number of size classes. Class `c` holds blocks of size `2^c` bytes.
///
/// Chosen so that `2^(CLASSES - 1) == LARGE_THRESHOLD`: class `CLASSES - 1`
/// is the last class served by superblocks, and `SB_SIZE / 2` lands exactly
/// on its block size.
pub const CLASSES: usize = 16;

/// Superblock size in bytes. Fixed at build time.
pub const SB_SIZE: usize = 64 * 1024;

/// Requests strictly larger than this go directly to the page source.
pub const LARGE_THRESHOLD: usize = SB_SIZE / 2;

/// Smallest class index a request can be routed to. `ceil(log2(sz))` for
/// `sz <= 1` is ill-defined, so sizes that small are clamped to this class
/// (8-byte blocks), matching the distilled spec's worked example.
pub const MIN_CLASS: u32 = 3;

/// Allowed empty fraction `F`, expressed as an integer ratio so the
/// reclamation predicate's multiplication stays in integer arithmetic
/// instead of pulling in floating point.
///
/// `u < (1 - F) * a` becomes `u * F_DEN < (F_DEN - F_NUM) * a`.
pub const F_NUM: usize = 2;
pub const F_DEN: usize = 5; // F = 2/5 = 0.4

/// Slack `K`, in units of superblocks, for the reclamation predicate's first
/// conjunct (`u < a - K*S`). Kept as a named constant — see DESIGN.md for why
/// the predicate keeps its two-conjunct form even at `K = 0`.
pub const K: usize = 0;

const _: () = assert!(CLASSES >= 1 && CLASSES <= 32, "CLASSES must fit a u32 shift");
const _: () = assert!(1usize << (CLASSES - 1) == LARGE_THRESHOLD, "class table must top out exactly at LARGE_THRESHOLD");
const _: () = assert!(F_NUM < F_DEN, "F must be in (0, 1)");
const _: () = assert!(CPUS >= 1, "at least one CPU heap is required");
