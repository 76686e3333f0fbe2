/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque tenant identifier carried in token claims and event metadata.
pub type CompanyId = String;

/// Opaque user identifier (the token subject).
pub type UserId = String;
