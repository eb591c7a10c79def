//! Location service adapters.

mod simulated;

pub use simulated::{SimulatedLocationService, SimulatedServiceConfig};
