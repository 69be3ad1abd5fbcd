//! Background jobs.

mod session_reaper;

pub use session_reaper::{
    spawn_session_reaper, SessionReaperConfig, SessionReaperHandle, SessionReaperMetrics,
};
