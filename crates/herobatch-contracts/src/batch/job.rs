use std::fmt;

const STATE_PREFIXES: &[&str] = &["JOB_STATE_", "BATCH_STATE_", "STATE_"];

/// Lifecycle state of a remote batch job. Only the terminal variants carry meaning;
/// everything else is kept verbatim and treated as "still running".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
    Other(String),
}

impl BatchState {
    /// Accepts both the SDK (`JOB_STATE_*`) and REST (`BATCH_STATE_*`) spellings.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let bare = STATE_PREFIXES
            .iter()
            .find_map(|prefix| upper.strip_prefix(*prefix))
            .unwrap_or(upper.as_str());
        match bare {
            "PENDING" | "QUEUED" => BatchState::Pending,
            "RUNNING" => BatchState::Running,
            "SUCCEEDED" => BatchState::Succeeded,
            "FAILED" => BatchState::Failed,
            "CANCELLED" | "CANCELED" => BatchState::Cancelled,
            "EXPIRED" => BatchState::Expired,
            _ => BatchState::Other(raw.trim().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Succeeded | BatchState::Failed | BatchState::Cancelled | BatchState::Expired
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            BatchState::Pending => "PENDING",
            BatchState::Running => "RUNNING",
            BatchState::Succeeded => "SUCCEEDED",
            BatchState::Failed => "FAILED",
            BatchState::Cancelled => "CANCELLED",
            BatchState::Expired => "EXPIRED",
            BatchState::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub name: String,
    pub state: BatchState,
    pub result_file: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
    Other(String),
}

impl FileState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROCESSING" => FileState::Processing,
            "ACTIVE" => FileState::Active,
            "FAILED" => FileState::Failed,
            _ => FileState::Other(raw.trim().to_string()),
        }
    }
}

/// Handle to a file held by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub state: FileState,
}

impl RemoteFile {
    /// URI if the service returned one, otherwise the resource name.
    pub fn reference(&self) -> &str {
        self.uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(self.name.as_str())
    }
}
