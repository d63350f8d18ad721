//! Single source of truth for "just passed" windows.
//!
//! Two different consumers care about how long ago a passage happened: the
//! bridge text shows "har precis passerat" for a fixed display window, while
//! lifecycle and target-protection logic use a longer, speed-dependent
//! internal grace period. Keeping both here prevents the two from drifting.

use chrono::{DateTime, Duration, Utc};

/// What the user sees: every passage is "recent" for this long.
pub const DISPLAY_WINDOW_SECS: i64 = 60;

/// Internal grace for fast vessels (above [`FAST_VESSEL_SOG_KN`]).
const INTERNAL_GRACE_FAST_SECS: i64 = 120;
/// Internal grace for slow vessels.
const INTERNAL_GRACE_SLOW_SECS: i64 = 60;
/// SOG above which a vessel counts as fast for grace purposes.
const FAST_VESSEL_SOG_KN: f64 = 2.0;

pub fn display_window() -> Duration {
    Duration::seconds(DISPLAY_WINDOW_SECS)
}

/// Lifecycle grace period after a passage, scaled by the vessel's speed at
/// the time it crossed.
pub fn internal_grace(sog_at_passage: f64) -> Duration {
    if sog_at_passage > FAST_VESSEL_SOG_KN {
        Duration::seconds(INTERNAL_GRACE_FAST_SECS)
    } else {
        Duration::seconds(INTERNAL_GRACE_SLOW_SECS)
    }
}

/// True while the passage should render as "har precis passerat".
pub fn should_show_recently_passed(passed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(passed_at);
    age >= Duration::zero() && age < display_window()
}

/// True while lifecycle logic should still protect the vessel after a
/// passage (cleanup extension, target stickiness).
pub fn within_internal_grace(
    passed_at: DateTime<Utc>,
    sog_at_passage: f64,
    now: DateTime<Utc>,
) -> bool {
    let age = now.signed_duration_since(passed_at);
    age >= Duration::zero() && age < internal_grace(sog_at_passage)
}
