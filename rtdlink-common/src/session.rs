//! Process run identity.

use chrono::{DateTime, Local};

/// Timestamp layout used in artifact names (file-system safe, no colons).
pub const SESSION_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

/// A single run of the bridge, identified by its start time.
///
/// The session id only names external artifacts such as the log file and
/// stored batch files.
#[derive(Debug, Clone)]
pub struct Session {
    started_at: DateTime<Local>,
    id: String,
}

impl Session {
    /// Start a session now.
    pub fn start() -> Self {
        Self::at(Local::now())
    }

    /// Create a session that started at the given instant.
    pub fn at(started_at: DateTime<Local>) -> Self {
        Self {
            id: started_at.format(SESSION_FORMAT).to_string(),
            started_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Name an artifact belonging to this session, e.g. `"<id>_log.txt"`.
    pub fn artifact_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.id, suffix)
    }
}
