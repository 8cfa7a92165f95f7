//! Shared vocabulary for the scale-down simulator: Kubernetes object helpers, reason codes,
//! label selector matching, resource quantities and logging setup.
pub mod constants;
pub mod pod;
pub mod reasons;
pub mod resources;
pub mod selector;
pub mod telemetry;
