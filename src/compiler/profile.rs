use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Counters collected across compiles.
///
/// Collection is enabled by setting the `SOMBRA_OGM_PROFILE` environment
/// variable before the first compile.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileProfileSnapshot {
    /// Total nanoseconds spent rendering statements.
    pub compile_ns: u64,
    /// Number of renders.
    pub compile_count: u64,
    /// Statements produced.
    pub statements: u64,
    /// Renders that took the batched relationship path.
    pub optimized_count: u64,
    /// Relationships dropped for unresolved endpoints.
    pub unresolved_skipped: u64,
}

#[derive(Default)]
struct CompileProfileCounters {
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    statements: AtomicU64,
    optimized_count: AtomicU64,
    unresolved_skipped: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<CompileProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SOMBRA_OGM_PROFILE").is_some())
}

fn counters() -> Option<&'static CompileProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(CompileProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

/// Records one finished render.
pub(crate) fn record_compile(start: Option<Instant>, statements: usize, optimized: bool) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    counters.compile_ns.fetch_add(nanos, Ordering::Relaxed);
    counters.compile_count.fetch_add(1, Ordering::Relaxed);
    counters
        .statements
        .fetch_add(statements as u64, Ordering::Relaxed);
    if optimized {
        counters.optimized_count.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_unresolved_skip() {
    if let Some(counters) = counters() {
        counters.unresolved_skipped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the current counters, or `None` when profiling is disabled.
///
/// With `reset`, counters are zeroed after reading.
pub fn compile_profile_snapshot(reset: bool) -> Option<CompileProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(CompileProfileSnapshot {
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        statements: load(&counters.statements),
        optimized_count: load(&counters.optimized_count),
        unresolved_skipped: load(&counters.unresolved_skipped),
    })
}
