//! Core types for replaygate: events, actions, the platform interfaces and
//! the `StateMachine` trait.

mod action;
mod event;
mod platform;
mod traits;

pub use action::Action;
pub use event::{Event, SystemSignature};
pub use platform::{DeliveredTransaction, NetworkMetrics, OrderingEngine, PlatformStatus, Round};
pub use traits::StateMachine;

#[cfg(any(test, feature = "test-utils"))]
pub use platform::{FixedNetworkMetrics, RecordingEngine};
