/// Patients are identified by the opaque id issued by the identity service.
pub type PatientId = String;

/// Alert ids are 32-character lowercase hex strings (UUID v4, simple form).
pub type AlertId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
