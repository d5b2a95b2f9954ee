//! Record normalization, history storage and tracing setup

pub mod history;
pub mod normalize;
pub mod tracing;

pub use history::{
    DEFAULT_MAX_RECORDS, HistoryError, HistoryKind, HistoryRecord, HistoryResult, HistoryStore,
    JsonFileStore, MemoryStore,
};
pub use normalize::{
    DEFAULT_PASSWORD, EventRecord, Outcome, TargetData, TargetResult, UnlockLog, UnlockStatus,
    normalize_event, normalize_events, normalize_query_result, normalize_unlock_log,
    normalize_unlock_logs, resolve_password,
};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
