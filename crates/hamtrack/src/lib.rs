//! Wheel activity tracking.
//!
//! A reed switch closes once per revolution. Raw edges are debounced into
//! revolutions, revolutions are grouped into sessions, and finished
//! sessions are pushed to subscribers and stored.
//!
//! ```text
//! EdgeSource → Debouncer → SessionTracker → Dispatcher ─┬─ notifier worker
//!                                                       └─ persistence worker
//! ```

pub mod debounce;
pub mod dispatch;
pub mod edge;
pub mod metrics;
pub mod notify;
pub mod run_loop;
pub mod session;
pub mod telemetry;
pub mod time;

pub use debounce::{Debouncer, RevolutionEvent};
pub use dispatch::{
    persist_record, session_record, DispatchConfig, DispatchWorkers, Dispatcher, OutcomeSink,
    PersistOutcome,
};
pub use edge::{ChannelEdgeSource, EdgeResult, EdgeSource, SensorError, SysfsEdgeSource};
pub use metrics::SessionMetrics;
pub use notify::{HttpNotifier, LogNotifier, Notification, NotificationPort, NotifyError};
pub use run_loop::{RunLoop, RunLoopConfig, RunSummary, SessionPipeline};
pub use session::{
    AbortReason, FinishedSession, SessionOutcome, SessionState, SessionTracker, TrackerConfig,
};
pub use time::{Clock, Timestamp};
