//! Core traits for state machines.

use crate::{Action, Event};
use std::time::Duration;

/// A state machine that processes events.
///
/// The replay side of a node is implemented as a state machine that is:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions, on every node
/// - **Pure-ish**: Mutates self, but leaves I/O (exports, submissions) to the runner
///
/// # Example
///
/// ```ignore
/// impl StateMachine for ReplicatedStateMachine {
///     fn handle(&mut self, event: Event) -> Vec<Action> {
///         match event {
///             Event::ConsensusRound(round) => self.on_round(round),
///             Event::SystemTransactions { round, signatures } => {
///                 self.on_system_signatures(round, signatures)
///             }
///             // ... etc
///         }
///     }
///
///     fn set_time(&mut self, now: Duration) {
///         self.now = now;
///     }
/// }
/// ```
pub trait StateMachine {
    /// Process an event, returning actions to perform.
    ///
    /// # Guarantees
    ///
    /// - **Synchronous**: This method never awaits
    /// - **Deterministic**: Given the same state and event, always returns the same actions
    /// - **No I/O**: Exports and submissions are performed by the runner via the returned actions
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call to provide the
    /// current wall-clock time.
    fn set_time(&mut self, now: Duration);

    /// Get the current time.
    ///
    /// Returns the time that was last set via `set_time()`.
    fn now(&self) -> Duration;
}
