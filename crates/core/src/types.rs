/// Controller-assigned job identifiers are opaque strings (hex UUIDs today,
/// but nothing in the client may depend on that).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
