//! Statistical analysis components.
//!
//! Everything in this module is a pure function of its inputs: no locking,
//! no I/O, no clocks. The facade feeds each component quality-passing
//! readings and receives an entity ready for the API layer.
//!
//! Submodules:
//! - `stats`: robust statistics primitives.
//! - `trend`: slope, seasonality, and confidence over a window.
//! - `recharge`: water-table-fluctuation recharge estimates.
//! - `risk`: weighted drought-risk scoring.

pub mod recharge;
pub mod risk;
pub mod stats;
pub mod trend;
