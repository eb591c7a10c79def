//! Add and remove coordinators for location service geofences.
//!
//! Each coordinator runs at most one request at a time. A request opens a
//! fresh connection, issues one operation once connected, reports exactly
//! one outcome and then disconnects. While a cycle is in progress further
//! requests are rejected with [`RequestRejection::OperationInProgress`].
//!
//! [`RequestRejection::OperationInProgress`]: crate::domain::RequestRejection::OperationInProgress

mod add;
mod cycle;
mod remove;

pub use add::AddCoordinator;
pub use cycle::{CoordinatorPorts, CyclePhase};
pub use remove::RemoveCoordinator;
