//! API Module
//!
//! Operator HTTP surface of a near cache.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Statistics snapshot
//! - `DELETE /stats` - Reset counters
//! - `DELETE /entries` - Clear the near cache
//! - `POST /persist` - Write a snapshot
//! - `POST /restore` - Load the snapshot

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
