//! Builder API for scenario construction.
//!
//! Scenarios are assembled from [`StateBuilder`]s and validated once, up
//! front. `build()` accumulates every structural problem (missing or
//! duplicate entrypoints, duplicate states, triggers to unknown states) into a
//! single [`ScenarioError`] instead of stopping at the first one.

pub mod error;
pub mod scenario;
pub mod state;

pub use error::{BuildError, ScenarioError};
pub use scenario::{Scenario, ScenarioBuilder};
pub use state::StateBuilder;
