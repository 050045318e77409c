use serde::{Deserialize, Serialize};

/// Identifies one geo-box fetch issued by a viewport session.
///
/// Small and copyable so completions can be routed back through channels
/// without allocation. Ids are never reused within a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchId(pub u64);

impl std::fmt::Display for FetchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fetch#{}", self.0)
    }
}

/// Lifecycle of a fetch as seen by the session that issued it.
///
/// Requested → InFlight → Completed | Failed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchState {
    Requested,
    InFlight,
    Completed,
    Failed,
}

impl FetchState {
    pub fn is_finished(self) -> bool {
        matches!(self, FetchState::Completed | FetchState::Failed)
    }
}
