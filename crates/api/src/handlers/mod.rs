//! Request handlers.
//!
//! - [`alerts`] -- SSE alert streams and acknowledgment.
//! - [`vitals`] -- vital reading ingestion.

pub mod alerts;
pub mod vitals;
