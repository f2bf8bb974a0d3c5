use std::collections::HashSet;

use crate::{UserId, Uuid};

/// Capability tokens carried in access-token claims. The claim set is a
/// plain list of strings; unknown tokens are kept but never match.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Permission {
    GetPublicThreads,
    GetPublicComments,
    CreateComment,
    UpdateSelfComment,
    DeleteSelfComment,
    UpdateUserComment,
    DeleteUserComment,
    GetDeletedComments,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::GetPublicThreads => "GET_PUBLIC_THREADS",
            Permission::GetPublicComments => "GET_PUBLIC_COMMENTS",
            Permission::CreateComment => "CREATE_COMMENT",
            Permission::UpdateSelfComment => "UPDATE_SELF_COMMENT",
            Permission::DeleteSelfComment => "DELETE_SELF_COMMENT",
            Permission::UpdateUserComment => "UPDATE_USER_COMMENT",
            Permission::DeleteUserComment => "DELETE_USER_COMMENT",
            Permission::GetDeletedComments => "GET_DELETED_COMMENTS",
        }
    }
}

/// What a guest may do without presenting any credential.
pub const GUEST_PERMISSIONS: [Permission; 2] =
    [Permission::GetPublicThreads, Permission::GetPublicComments];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserState {
    NotConfirmed,
    Active,
    Blocked,
    Deleted,
}

impl UserState {
    pub fn as_str(self) -> &'static str {
        match self {
            UserState::NotConfirmed => "NOT_CONFIRMED",
            UserState::Active => "ACTIVE",
            UserState::Blocked => "BLOCKED",
            UserState::Deleted => "DELETED",
        }
    }

    pub fn from_claim(s: &str) -> Option<UserState> {
        match s {
            "NOT_CONFIRMED" => Some(UserState::NotConfirmed),
            "ACTIVE" => Some(UserState::Active),
            "BLOCKED" => Some(UserState::Blocked),
            "DELETED" => Some(UserState::Deleted),
            _ => None,
        }
    }
}

/// Claim shape of a verified access token.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct TokenClaims {
    pub id: String,
    pub permissions: Vec<String>,
    pub state: String,
    pub exp: i64,
}

/// The caller context every authorization decision runs against. Built
/// per call from a verified credential, never persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Principal {
    Authenticated {
        id: UserId,
        permissions: HashSet<String>,
        state: UserState,
        exp: i64,
    },
    Unauthenticated,
}

impl Principal {
    /// Build an authenticated principal out of verified claims. Returns
    /// `None` when the claim payload does not have the required shape.
    pub fn from_claims(claims: &TokenClaims) -> Option<Principal> {
        let id = Uuid::parse_str(&claims.id).ok()?;
        let state = UserState::from_claim(&claims.state)?;
        Some(Principal::Authenticated {
            id: UserId(id),
            permissions: claims.permissions.iter().cloned().collect(),
            state,
            exp: claims.exp,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated { .. })
    }

    pub fn id(&self) -> Option<UserId> {
        match self {
            Principal::Authenticated { id, .. } => Some(*id),
            Principal::Unauthenticated => None,
        }
    }

    pub fn state(&self) -> Option<UserState> {
        match self {
            Principal::Authenticated { state, .. } => Some(*state),
            Principal::Unauthenticated => None,
        }
    }

    pub fn can(&self, perm: Permission) -> bool {
        match self {
            Principal::Authenticated { permissions, .. } => permissions.contains(perm.as_str()),
            Principal::Unauthenticated => GUEST_PERMISSIONS.contains(&perm),
        }
    }
}
