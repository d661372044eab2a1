//! Acquisition Service (acqsrv)
//!
//! Polls PLC devices on a fixed tick, decodes raw protocol words into typed
//! variables, derives calculated elements and archives changed samples into
//! bounded per-series event storage.
//!
//! ```text
//! Scheduler ──tick──▶ Device ──RequestTable──▶ Transport (Modbus TCP | simulated)
//!                       │
//!                       ├─ variables / calculated elements
//!                       ├─ RefreshedEvent ──▶ broadcast subscribers
//!                       └─ DeviceArchive ──▶ EventStorage ──▶ SQLite | memory
//! ```

pub mod archive;
pub mod calc;
pub mod config;
pub mod device;
pub mod error;
pub mod reconnect;
pub mod request;
pub mod runtime;
pub mod scheduler;
pub mod transport;
pub mod variable;

pub use archive::{ArchiveBackend, ArchiveLayout, DeviceArchive, MemoryArchive};
pub use config::AcqConfig;
pub use device::{Device, DevicePayload, DeviceState, RefreshedEvent};
pub use error::{AcqError, Result, TransportError};
pub use runtime::Gateway;
pub use scheduler::{Scheduler, SchedulerHandle, SharedDevice};
