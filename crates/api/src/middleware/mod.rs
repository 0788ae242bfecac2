//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- Extracts the caller from the trusted identity headers.
//! - [`rbac::RequireCaregiver`] -- Requires `caregiver` or `admin` role.
//! - [`rbac::resolve_subscription`] -- Scope rules for alert subscriptions.

pub mod auth;
pub mod rbac;
