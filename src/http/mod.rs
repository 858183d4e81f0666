//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → inflight.rs (admission gate, in-flight count)
//!     → handlers.rs (route logic, metric samples, shipped records)
//!     → jobs.rs (bounded background work spawned by handlers)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Shutdown closes admission first, then drains within a deadline
//! - Background work is bounded; saturation rejects instead of growing

pub mod handlers;
pub mod inflight;
pub mod jobs;
pub mod server;

pub use handlers::{OrderIdSource, OrderSimulation};
pub use inflight::InFlightTracker;
pub use jobs::{JobError, JobPool};
pub use server::{AppState, RequestServer, ServerError, ShutdownOutcome};
