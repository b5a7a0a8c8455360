//! Response models for the operator API
//!
//! DTOs serialized into HTTP response bodies.

pub mod responses;

pub use responses::{ClearResponse, HealthResponse, PersistResponse, RestoreResponse, StatsResponse};
