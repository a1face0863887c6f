// ── Capacity classification ─────────────────────────────────────

/// Remaining hours at or below this mark a day as full.
pub const FULL_REMAINING_HOURS: f64 = 0.0;

/// Remaining hours strictly below this (and above full) mark a day as near-full.
pub const NEAR_FULL_HOURS: f64 = 2.0;

/// Allocated/max ratio above which a summary day reads as high load.
pub const HIGH_LOAD_RATIO: f64 = 0.8;

// ── Timing defaults ─────────────────────────────────────────────

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_SUMMARY_TTL_MS: u64 = 8_000;
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

// ── Request limits ──────────────────────────────────────────────

/// Widest capacity window a single request may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Most targets a single fill gesture may write.
pub const MAX_FILL_TARGETS: usize = 10_000;

/// How many times a request re-waits behind an invalidated in-flight fetch
/// before it gives up and fails open.
pub const MAX_STALE_REFETCHES: usize = 3;
