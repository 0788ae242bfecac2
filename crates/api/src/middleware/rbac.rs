//! Role-based access control.
//!
//! [`RequireCaregiver`] gates the aggregate caregiver stream;
//! [`resolve_subscription`] decides which `(scope, role)` key a subscribe
//! request may use; [`acknowledgment_role`] decides who may acknowledge.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use vitalwatch_core::error::CoreError;
use vitalwatch_core::roles::Role;
use vitalwatch_events::registry::PatientScope;

use super::auth::AuthUser;
use crate::error::AppError;

/// Requires the `caregiver` or `admin` role. Rejects with 403 Forbidden otherwise.
///
/// ```ignore
/// async fn caregiver_only(RequireCaregiver(user): RequireCaregiver) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
pub struct RequireCaregiver(pub AuthUser);

impl<S> FromRequestParts<S> for RequireCaregiver
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        match user.role {
            Role::Caregiver | Role::Admin => Ok(RequireCaregiver(user)),
            Role::Patient
            | Role::Dispatcher
            | Role::Doctor
            | Role::Nurse
            | Role::FirstResponder
            | Role::Hospital => Err(AppError::Core(CoreError::Forbidden(
                "Caregiver role required".into(),
            ))),
        }
    }
}

/// Resolve the subscription key a caller may listen on.
///
/// - a `patient` caller always listens as patient on its own id;
///   `patient_id` is ignored.
/// - the caller must be allowed to observe as `requested` (see
///   [`Role::may_observe_as`]).
/// - only roles that may watch every patient can use `*`, `all`, or omit
///   `patient_id`; everyone else must name a patient.
pub fn resolve_subscription(
    user: &AuthUser,
    requested: Role,
    patient_id: Option<&str>,
) -> Result<(PatientScope, Role), AppError> {
    if user.role == Role::Patient {
        if requested != Role::Patient {
            return Err(AppError::Core(CoreError::Forbidden(format!(
                "User does not have {requested} role"
            ))));
        }
        return Ok((PatientScope::Patient(user.user_id.clone()), Role::Patient));
    }

    if !user.role.may_observe_as(requested) {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "User does not have {requested} role"
        ))));
    }

    let explicit = patient_id.map(str::trim).filter(|id| !id.is_empty());
    match (PatientScope::parse(explicit), explicit) {
        (PatientScope::All, _) if user.role.may_watch_all_patients() => Ok((PatientScope::All, requested)),
        (PatientScope::All, None) => Err(AppError::Core(CoreError::Validation(
            "patient_id required for non-admin roles".into(),
        ))),
        (PatientScope::All, Some(_)) => Err(AppError::Core(CoreError::Forbidden(
            "Only admins can subscribe to all patients".into(),
        ))),
        (scope @ PatientScope::Patient(_), _) => Ok((scope, requested)),
    }
}

/// Role an acknowledgment of `patient_id`'s alert is recorded under.
///
/// The patient themself acknowledges as `patient`. Patients cannot touch
/// anyone else's alerts; other roles acknowledge under their own role.
pub fn acknowledgment_role(user: &AuthUser, patient_id: &str) -> Result<Role, AppError> {
    if user.user_id == patient_id {
        return Ok(Role::Patient);
    }
    if user.role == Role::Patient {
        return Err(AppError::Core(CoreError::Forbidden(
            "Patients may only acknowledge their own alerts".into(),
        )));
    }
    Ok(user.role)
}
