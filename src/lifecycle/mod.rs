//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Starting (coordinator.rs):
//!     Open log sink (fatal on failure) → Start emitter → Bind HTTP server
//!
//! Running:
//!     Wait for the termination signal (signals.rs)
//!
//! Stopping (coordinator.rs):
//!     Cancel emitter (shutdown.rs) → Drain server with deadline → Close log sink
//! ```
//!
//! # Design Decisions
//! - Ordered startup: log sink first, listeners last (traffic only when ready)
//! - Ordered shutdown: steps run sequentially so the sink stays writable
//!   while the server drains
//! - Shutdown has a deadline: forced close after it, still exit 0

pub mod coordinator;
pub mod shutdown;
pub mod signals;

pub use coordinator::{
    LifecycleCoordinator, LifecycleState, RunningService, ShutdownReport, StartupError,
};
pub use shutdown::Shutdown;
pub use signals::{wait_for_termination, Signal};
