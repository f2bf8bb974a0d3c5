use chrono::Utc;

mod auth;
mod error;

pub use auth::{Permission, Principal, TokenClaims, UserState, GUEST_PERMISSIONS};
pub use error::Error;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Longest comment the service accepts, in characters.
pub const MAX_COMMENT_LEN: usize = 1000;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    pub fn stub() -> ThreadId {
        ThreadId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// State of the content item comments attach to. Only `Published` threads
/// accept new comments.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ThreadState {
    Draft,
    Published,
    Archived,
    Deleted,
}

impl ThreadState {
    pub fn from_db(v: i32) -> Option<ThreadState> {
        match v {
            0 => Some(ThreadState::Draft),
            1 => Some(ThreadState::Published),
            2 => Some(ThreadState::Archived),
            3 => Some(ThreadState::Deleted),
            _ => None,
        }
    }

    pub fn to_db(self) -> i32 {
        match self {
            ThreadState::Draft => 0,
            ThreadState::Published => 1,
            ThreadState::Archived => 2,
            ThreadState::Deleted => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum CommentState {
    Deleted,
    Published,
}

impl CommentState {
    pub fn from_db(v: i32) -> Option<CommentState> {
        match v {
            0 => Some(CommentState::Deleted),
            1 => Some(CommentState::Published),
            _ => None,
        }
    }

    pub fn to_db(self) -> i32 {
        match self {
            CommentState::Deleted => 0,
            CommentState::Published => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum NotificationType {
    CommentAnswer,
}

impl NotificationType {
    pub fn to_db(self) -> i32 {
        match self {
            NotificationType::CommentAnswer => 1,
        }
    }
}

/// A comment as stored and as returned to clients. Deleted comments keep
/// their row; visibility rules decide what `content` the caller sees.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub state: CommentState,
    pub owner_id: UserId,
    pub created_at: Time,
    pub updated_at: Option<Time>,
}

/// One node of a reconstructed thread: the comment plus its position in
/// the tree and its direct answers, children ordered by ascending id.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub parent_id: Option<CommentId>,
    pub level: i32,
    pub answers: Vec<CommentNode>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct CommentCreate {
    pub content: String,
}

impl CommentCreate {
    pub fn validate(&self) -> Result<(), Error> {
        validate_content(&self.content)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct CommentUpdate {
    pub content: String,
}

impl CommentUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        validate_content(&self.content)
    }
}

pub fn validate_content(s: &str) -> Result<(), Error> {
    if s.is_empty() {
        return Err(Error::BadRequest(String::from(
            "comment content must not be empty",
        )));
    }
    if s.chars().count() > MAX_COMMENT_LEN {
        return Err(Error::BadRequest(format!(
            "comment content must not exceed {} characters",
            MAX_COMMENT_LEN
        )));
    }
    if s.contains('\0') {
        return Err(Error::BadRequest(String::from(
            "null byte in comment content is not allowed",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content(&"x".repeat(MAX_COMMENT_LEN)), Ok(()));

        assert!(matches!(validate_content(""), Err(Error::BadRequest(_))));
        assert!(matches!(
            validate_content(&"x".repeat(MAX_COMMENT_LEN + 1)),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            validate_content("foo\0bar"),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn state_db_mapping() {
        for s in [CommentState::Deleted, CommentState::Published] {
            assert_eq!(CommentState::from_db(s.to_db()), Some(s));
        }
        assert_eq!(CommentState::from_db(7), None);
        for s in [
            ThreadState::Draft,
            ThreadState::Published,
            ThreadState::Archived,
            ThreadState::Deleted,
        ] {
            assert_eq!(ThreadState::from_db(s.to_db()), Some(s));
        }
    }
}
