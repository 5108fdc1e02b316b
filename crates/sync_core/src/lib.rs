//! Dashboard-side synchronization of the shared controls record and sensor
//! readings.
//!
//! A [`DashboardSession`] keeps a local [`ControlCache`] of the controls record
//! and the latest sensor reading. A periodic [`SyncLoop`] pulls both from the
//! [`SharedStore`] and reconciles them into the cache, while the
//! [`WriteCoordinator`] and [`CompositeSequencer`] apply user changes
//! optimistically and upsert them field by field. Convergence between sessions
//! (and the physical device) happens only through the store.

pub mod cache;
pub mod composite;
mod context;
pub mod error;
pub mod http_store;
pub mod session;
pub mod store;
pub mod sync_loop;
pub mod writer;

pub use cache::{merge, ControlCache, DisplayState, FetchMark, FetchedControls, ReconcileReport};
pub use composite::{CompositeOutcome, CompositeSequencer};
pub use error::WriteError;
pub use http_store::HttpSharedStore;
pub use session::{DashboardSession, SessionConfig, SessionEvent, DEFAULT_POLL_INTERVAL};
pub use store::{MemoryStore, SharedStore};
pub use sync_loop::{PollOutcome, SyncLoop};
pub use writer::{WriteCoordinator, WriteReceipt, WriteTicket};
