//! Adaptive submission governor.
//!
//! Decides whether the local node may hand another transaction to the
//! ordering engine.
//!
//! ```text
//!   payload ──► force-pause ──► pause-after-N ──► quorum latch ──► goal
//!                                                                   │
//!                       ordering engine ◄── token buckets ◄─────────┘
//! ```
//!
//! The quorum latch pauses on an ENTER firing and releases on the matching
//! EXIT firing, which also starts a new measurement cycle. Control and
//! freeze transactions skip every gate.

mod config;
mod governor;
mod metrics;
mod throttle;

pub use config::{
    GoalMetric, GoalSense, GovernorConfig, GovernorConfigError, PauseAfter, RateLimit,
    SubmitGoal, ThrottleConfig,
};
pub use governor::{SubmissionGovernor, Veto};
pub use metrics::SubmissionMetrics;
pub use throttle::{ThrottleScope, ThrottleSet, TokenBucket};
