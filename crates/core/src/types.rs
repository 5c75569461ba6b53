/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Runs are identified by a UUID v7 rendered as a string.
pub type RunId = String;

/// Generate a fresh, time-ordered run identifier.
pub fn new_run_id() -> RunId {
    uuid::Uuid::now_v7().to_string()
}
