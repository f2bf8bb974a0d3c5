use fadeno_api::{Error as ApiError, Permission, Principal, UserState};

/// Declarative pre-check attached to a service operation: an optional
/// required permission token and an optional required account state.
/// Permission is checked first, then state; both must pass before the
/// operation body runs.
#[derive(Clone, Copy, Debug)]
pub struct Gate {
    permission: Option<Permission>,
    state: Option<UserState>,
}

impl Gate {
    pub const fn new() -> Gate {
        Gate {
            permission: None,
            state: None,
        }
    }

    pub const fn require(mut self, permission: Permission) -> Gate {
        self.permission = Some(permission);
        self
    }

    pub const fn require_state(mut self, state: UserState) -> Gate {
        self.state = Some(state);
        self
    }

    pub fn check(&self, user: &Principal) -> Result<(), ApiError> {
        if let Some(perm) = self.permission {
            if !user.can(perm) {
                return Err(ApiError::AccessDenied(format!(
                    "missing permission {}",
                    perm.as_str()
                )));
            }
        }
        if let Some(state) = self.state {
            // an unauthenticated principal has no state and fails here
            if user.state() != Some(state) {
                return Err(ApiError::AccessDenied(format!(
                    "account state must be {}",
                    state.as_str()
                )));
            }
        }
        Ok(())
    }
}
