//! # RC Engine
//!
//! Resource Credit accounting and delegation allocation.
//!
//! ## Contained Modules:
//!
//! - **`snapshot`**: raw reading to decision-ready `AccountRcState`.
//! - **`roster`**: which accounts supply and which consume.
//! - **`ledger`**: outbound grants and this cycle's pending changes.
//! - **`allocation`**: the per-cycle decision state machine.
//! - **`sink`**: batched broadcast and history persistence.

/// Per-cycle allocation decisions.
pub mod allocation;
/// Outbound delegation cache with pending changes.
pub mod ledger;
/// Tracked accounts.
pub mod roster;
/// Broadcast and persistence of a cycle's outcome.
pub mod sink;
/// RC snapshot model.
pub mod snapshot;

pub use allocation::{AllocationCycleResult, AllocationEngine, AllocationError, Correction, CyclePhase};
pub use ledger::{DelegationLedger, PendingDelegation};
pub use roster::AccountRoster;
pub use sink::{RcSink, SinkReport};
pub use snapshot::{build_snapshot, AccountRcState, DirectDelegation, Role, SnapshotSet, Status, REGEN_PERIOD_SECONDS};
