//! Observer roles.
//!
//! A role decides which alerts an observer receives: every broadcast is
//! addressed to a list of roles, and subscriptions are keyed by role. The
//! wire names are the lowercase snake_case forms (`"first_responder"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The monitored patient. Also accepted as `"user"` on input.
    #[serde(alias = "user")]
    Patient,
    Caregiver,
    Dispatcher,
    Doctor,
    Nurse,
    FirstResponder,
    /// Hospital staff pool; reachable by doctors and admins.
    Hospital,
    /// Administrators; the only role allowed to watch every patient.
    Admin,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Patient,
        Role::Caregiver,
        Role::Dispatcher,
        Role::Doctor,
        Role::Nurse,
        Role::FirstResponder,
        Role::Hospital,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Caregiver => "caregiver",
            Role::Dispatcher => "dispatcher",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::FirstResponder => "first_responder",
            Role::Hospital => "hospital",
            Role::Admin => "admin",
        }
    }

    /// Whether a caller holding `self` may subscribe to alerts addressed to
    /// `requested`.
    ///
    /// Admins may listen as any role. The `hospital` pool is shared by
    /// doctors. Everyone else may only listen as themselves.
    pub fn may_observe_as(self, requested: Role) -> bool {
        match (self, requested) {
            (Role::Admin, _) => true,
            (Role::Doctor, Role::Hospital) => true,
            (caller, requested) => caller == requested,
        }
    }

    /// Whether this role may subscribe to the wildcard (all patients) scope.
    pub fn may_watch_all_patients(self) -> bool {
        match self {
            Role::Admin => true,
            Role::Patient
            | Role::Caregiver
            | Role::Dispatcher
            | Role::Doctor
            | Role::Nurse
            | Role::FirstResponder
            | Role::Hospital => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "user" {
            return Ok(Role::Patient);
        }
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| CoreError::Validation(format!("Invalid role: {s}")))
    }
}
