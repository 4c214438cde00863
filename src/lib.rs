pub mod clustering;
pub mod sandbox;

// ============================================================================
// Profiling Macros
// ============================================================================

/// Log a sandbox summary every 100 ticks when `perf_stats` is enabled.
///
/// Without the feature this expands to nothing and the arguments are never
/// evaluated.
///
/// ```ignore
/// profile_log!(tick, "{} clusters active", engine.stats().active_clusters);
/// ```
#[macro_export]
#[cfg(feature = "perf_stats")]
macro_rules! profile_log {
    ($tick:expr, $($arg:tt)*) => {
        if $tick % 100 == 0 {
            bevy::prelude::info!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "perf_stats"))]
macro_rules! profile_log {
    ($tick:expr, $($arg:tt)*) => {};
}
