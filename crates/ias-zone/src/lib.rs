//! IAS Zone server.
//!
//! Reliable delivery of zone status changes to the bound CIE: enrollment
//! state, a fixed-capacity status queue with overwrite-on-full, exponential
//! backoff retries, and a single-outstanding-attempt delivery scheduler.
//!
//! Protocol logic lives in the synchronous [`ZoneServer`] core, which
//! returns [`ZoneEffect`]s. The [`runtime`] module runs it on a tokio task
//! against a [`Transport`].
//!
//! Wire format: ZCL IAS Zone cluster (0x0500), little-endian.

pub mod config;
pub mod effect;
pub mod enrollment;
pub mod error;
pub mod frame;
pub mod network;
pub mod queue;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod store;
pub mod types;

pub use config::ZoneConfig;
pub use effect::{AttemptId, ParkReason, TimerHandle, TimerKey, ZoneEffect, ZoneEvent};
pub use enrollment::{EnrollmentRecord, EnrollmentTable};
pub use error::{SendError, ZoneError};
pub use frame::{EnrollRequest, EnrollResponse, FrameError, StatusChangeNotification};
pub use network::{NetworkDownReason, NetworkStatus};
pub use queue::{QueueEntry, SlotResult, StatusQueue};
pub use retry::{RetryController, RetryPolicy, RetryState, MAX_BACKOFF_CEILING_SECS};
pub use runtime::{RuntimeChannels, RuntimeConfig, Transport, ZoneHandle, ZoneRuntime};
pub use scheduler::{DeliveryGate, DeliveryScheduler, SchedulerState};
pub use server::{Diagnostics, ZoneServer};
pub use stats::DeliveryStats;
pub use store::{AttributeStore, AttributeStoreExt, MemoryStore, SqliteStore};
pub use types::{
    attr, AttributeId, EnrollResponseCode, EnrollmentMode, Endpoint, IeeeAddress, SendResult,
    ZoneId, ZoneState, ZoneStatus,
};
