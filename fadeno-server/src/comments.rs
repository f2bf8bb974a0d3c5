use anyhow::Context;
use chrono::Duration;
use fadeno_api::{
    Comment, CommentCreate, CommentId, CommentNode, CommentState, CommentUpdate,
    Error as ApiError, NotificationType, Permission, Principal, ThreadId, ThreadState, Time,
    UserId, UserState,
};
use sqlx::{Connection, PgConnection};

use crate::{db, tree, Error};

const DELETED_PLACEHOLDER: &str = "Comment deleted";
const DELETED_PREFIX: &str = "(Comment deleted): ";
const ANSWER_NOTIFICATION: &str = "New answer to your comment";

/// Self-edits are only allowed this long after creation; the elevated
/// update permission bypasses the window.
const EDIT_WINDOW_HOURS: i64 = 24;

use crate::gate::Gate;

const ADD_COMMENT: Gate = Gate::new()
    .require(Permission::CreateComment)
    .require_state(UserState::Active);
const GET_THREAD: Gate = Gate::new().require(Permission::GetPublicComments);
const DELETE_COMMENT: Gate = Gate::new().require_state(UserState::Active);
const UPDATE_COMMENT: Gate = Gate::new().require_state(UserState::Active);
const DELETE_ALL_COMMENTS: Gate = Gate::new()
    .require(Permission::DeleteUserComment)
    .require_state(UserState::Active);

/// Orchestrates comment operations for one caller over one connection.
/// Every write runs in a single transaction; the gates run before any
/// statement is issued.
pub struct CommentService<'a> {
    pub conn: &'a mut PgConnection,
    pub user: &'a Principal,
}

impl CommentService<'_> {
    pub async fn add_comment(
        &mut self,
        thread: ThreadId,
        data: CommentCreate,
        parent_id: Option<CommentId>,
    ) -> Result<Comment, Error> {
        ADD_COMMENT.check(self.user)?;
        data.validate()?;
        let owner = self
            .user
            .id()
            .ok_or_else(|| Error::access_denied("authentication required"))?;

        let mut tx = self
            .conn
            .begin()
            .await
            .context("starting add-comment transaction")?;
        tree::lock_thread(&mut tx, thread).await?;

        let thread_state = db::thread_state(&mut tx, thread)
            .await?
            .ok_or_else(|| Error::not_found("thread not found"))?;
        check_thread_open(thread_state)?;

        let mut parent = None;
        let mut parent_level = -1;
        if let Some(pid) = parent_id {
            let p = db::fetch_comment(&mut tx, pid)
                .await?
                .ok_or_else(|| Error::not_found("parent comment not found"))?;
            let node = db::self_edge(&mut tx, pid)
                .await?
                .ok_or_else(|| Error::not_found("parent comment is not attached to a thread"))?;
            check_parent(&p, node.thread_id, thread)?;
            parent_level = node.level;
            parent = Some(p);
        }

        let comment = db::insert_comment(&mut tx, &data.content, owner).await?;

        if let Some(target) = notification_target(parent.as_ref(), owner) {
            db::create_notification(
                &mut tx,
                target,
                NotificationType::CommentAnswer,
                comment.id.0,
                ANSWER_NOTIFICATION,
            )
            .await?;
        }

        tree::insert_branch(&mut tx, parent_id, comment.id, thread, parent_level).await?;
        tx.commit()
            .await
            .context("committing add-comment transaction")?;
        Ok(comment)
    }

    pub async fn get_comment(&mut self, id: CommentId) -> Result<Comment, Error> {
        let mut comment = db::fetch_comment(self.conn, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("comment {} not found", id.0)))?;
        redact(&mut comment, self.user)?;
        Ok(comment)
    }

    pub async fn get_thread(&mut self, thread: ThreadId) -> Result<Vec<CommentNode>, Error> {
        GET_THREAD.check(self.user)?;
        db::thread_state(self.conn, thread)
            .await?
            .ok_or_else(|| Error::not_found("thread not found"))?;
        let mut rows = tree::thread_nodes(self.conn, thread).await?;
        for row in &mut rows {
            redact(&mut row.comment, self.user)?;
        }
        Ok(tree::build_forest(rows))
    }

    pub async fn delete_comment(&mut self, id: CommentId) -> Result<(), Error> {
        DELETE_COMMENT.check(self.user)?;
        let mut tx = self
            .conn
            .begin()
            .await
            .context("starting delete-comment transaction")?;
        // the row lock holds concurrent deletes of the same comment at the
        // fetch, so only the first one sees state=Published
        let comment = db::fetch_comment_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("comment {} not found", id.0)))?;
        if comment.state == CommentState::Deleted {
            return Err(Error::bad_request(format!(
                "comment {} is already deleted",
                id.0
            )));
        }
        check_owner_rule(
            comment.owner_id,
            self.user,
            Permission::DeleteSelfComment,
            Permission::DeleteUserComment,
            "delete",
        )?;
        let rows = db::set_comment_state(&mut tx, id, CommentState::Deleted).await?;
        ensure_written(rows, id)?;
        tx.commit()
            .await
            .context("committing delete-comment transaction")?;
        Ok(())
    }

    pub async fn update_comment(&mut self, id: CommentId, data: CommentUpdate) -> Result<(), Error> {
        UPDATE_COMMENT.check(self.user)?;
        data.validate()?;
        let mut tx = self
            .conn
            .begin()
            .await
            .context("starting update-comment transaction")?;
        let comment = db::fetch_comment_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("comment {} not found", id.0)))?;
        if comment.state == CommentState::Deleted {
            return Err(Error::bad_request(format!(
                "comment {} is already deleted",
                id.0
            )));
        }
        check_owner_rule(
            comment.owner_id,
            self.user,
            Permission::UpdateSelfComment,
            Permission::UpdateUserComment,
            "update",
        )?;
        check_edit_window(comment.created_at, chrono::Utc::now(), self.user)?;
        let rows = db::update_comment_content(&mut tx, id, &data.content).await?;
        ensure_written(rows, id)?;
        tx.commit()
            .await
            .context("committing update-comment transaction")?;
        Ok(())
    }

    pub async fn delete_all_comments(&mut self, thread: ThreadId) -> Result<(), Error> {
        DELETE_ALL_COMMENTS.check(self.user)?;
        let mut tx = self
            .conn
            .begin()
            .await
            .context("starting purge transaction")?;
        tree::lock_thread(&mut tx, thread).await?;
        db::thread_state(&mut tx, thread)
            .await?
            .ok_or_else(|| Error::not_found("thread not found"))?;
        tree::delete_thread_edges(&mut tx, thread).await?;
        tx.commit().await.context("committing purge transaction")?;
        Ok(())
    }
}

/// Only published threads take new comments.
fn check_thread_open(state: ThreadState) -> Result<(), ApiError> {
    if state != ThreadState::Published {
        return Err(ApiError::BadRequest(String::from(
            "cannot comment on an unpublished thread",
        )));
    }
    Ok(())
}

/// A reply may only attach to a live parent registered in the same thread.
fn check_parent(
    parent: &Comment,
    parent_thread: ThreadId,
    thread: ThreadId,
) -> Result<(), ApiError> {
    if parent_thread != thread {
        return Err(ApiError::BadRequest(format!(
            "parent comment does not belong to thread {}",
            thread.0
        )));
    }
    if parent.state == CommentState::Deleted {
        return Err(ApiError::BadRequest(String::from(
            "parent comment is deleted",
        )));
    }
    Ok(())
}

/// The parent's owner gets notified about a reply, unless they are
/// answering themselves. Root comments notify nobody.
fn notification_target(parent: Option<&Comment>, owner: UserId) -> Option<UserId> {
    parent.map(|p| p.owner_id).filter(|target| *target != owner)
}

/// A write that matched no row means the comment vanished between our
/// locked fetch and the statement; report it rather than claim success.
fn ensure_written(rows_affected: u64, id: CommentId) -> Result<(), ApiError> {
    if rows_affected == 0 {
        return Err(ApiError::NotFound(format!(
            "comment {} no longer exists",
            id.0
        )));
    }
    Ok(())
}

/// Content-level visibility: deleted comments stay listed but their text
/// is replaced, unless the caller may view deleted comments, in which
/// case the original text is kept behind a deletion marker. Published
/// comments need the public read permission.
fn redact(comment: &mut Comment, user: &Principal) -> Result<(), ApiError> {
    match comment.state {
        CommentState::Deleted => {
            if user.can(Permission::GetDeletedComments) {
                comment.content = format!("{}{}", DELETED_PREFIX, comment.content);
            } else {
                comment.content = String::from(DELETED_PLACEHOLDER);
            }
            Ok(())
        }
        CommentState::Published => {
            if user.can(Permission::GetPublicComments) {
                Ok(())
            } else {
                Err(ApiError::AccessDenied(String::from(
                    "you cannot view public comments",
                )))
            }
        }
    }
}

/// The owner needs the "self" token, anyone else the elevated "user"
/// token, for destructive comment operations.
fn check_owner_rule(
    owner: UserId,
    user: &Principal,
    self_perm: Permission,
    other_perm: Permission,
    verb: &str,
) -> Result<(), ApiError> {
    let caller = user
        .id()
        .ok_or_else(|| ApiError::AccessDenied(String::from("authentication required")))?;
    if caller != owner {
        if !user.can(other_perm) {
            return Err(ApiError::AccessDenied(format!(
                "cannot {} someone else's comment",
                verb
            )));
        }
    } else if !user.can(self_perm) {
        return Err(ApiError::AccessDenied(format!(
            "cannot {} your own comment",
            verb
        )));
    }
    Ok(())
}

fn check_edit_window(created_at: Time, now: Time, user: &Principal) -> Result<(), ApiError> {
    if created_at + Duration::hours(EDIT_WINDOW_HOURS) < now
        && !user.can(Permission::UpdateUserComment)
    {
        return Err(ApiError::BadRequest(format!(
            "cannot update a comment older than {} hours",
            EDIT_WINDOW_HOURS
        )));
    }
    Ok(())
}
