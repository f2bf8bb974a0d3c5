use anyhow::Context;
use chrono::Utc;
use fadeno_api::{
    Comment, CommentId, CommentState, NotificationType, ThreadId, ThreadState, UserId, Uuid,
};
use sqlx::{postgres::PgRow, PgConnection, Row};

pub fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    let state: i32 = row.try_get("state").context("retrieving the state field")?;
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        content: row
            .try_get("content")
            .context("retrieving the content field")?,
        state: CommentState::from_db(state)
            .with_context(|| format!("comment row has invalid state {}", state))?,
        owner_id: UserId(
            row.try_get("owner_id")
                .context("retrieving the owner_id field")?,
        ),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        updated_at: row
            .try_get("updated_at")
            .context("retrieving the updated_at field")?,
    })
}

pub async fn thread_state(
    conn: &mut PgConnection,
    thread: ThreadId,
) -> anyhow::Result<Option<ThreadState>> {
    let row = sqlx::query("SELECT state FROM threads WHERE id = $1")
        .bind(thread.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying thread {:?}", thread))?;
    match row {
        None => Ok(None),
        Some(row) => {
            let state: i32 = row.try_get("state").context("retrieving the state field")?;
            Ok(Some(ThreadState::from_db(state).with_context(|| {
                format!("thread row has invalid state {}", state)
            })?))
        }
    }
}

pub async fn fetch_comment(
    conn: &mut PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let row = sqlx::query(
        "SELECT id, content, state, owner_id, created_at, updated_at FROM comments WHERE id = $1",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("querying comment {:?}", id))?;
    row.map(|r| comment_from_row(&r)).transpose()
}

/// Like [`fetch_comment`] but takes the row lock for the rest of the
/// current transaction, serializing concurrent state changes.
pub async fn fetch_comment_for_update(
    conn: &mut PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let row = sqlx::query(
        "SELECT id, content, state, owner_id, created_at, updated_at FROM comments WHERE id = $1 FOR UPDATE",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("locking comment {:?}", id))?;
    row.map(|r| comment_from_row(&r)).transpose()
}

pub async fn insert_comment(
    conn: &mut PgConnection,
    content: &str,
    owner: UserId,
) -> anyhow::Result<Comment> {
    let id = CommentId(Uuid::new_v4());
    let created_at = Utc::now();
    sqlx::query("INSERT INTO comments (id, content, state, owner_id, created_at) VALUES ($1, $2, $3, $4, $5)")
        .bind(id.0)
        .bind(content)
        .bind(CommentState::Published.to_db())
        .bind(owner.0)
        .bind(created_at)
        .execute(conn)
        .await
        .with_context(|| format!("inserting comment {:?}", id))?;
    Ok(Comment {
        id,
        content: String::from(content),
        state: CommentState::Published,
        owner_id: owner,
        created_at,
        updated_at: None,
    })
}

/// Returns the number of rows actually updated; 0 means the comment row
/// vanished before the statement ran.
pub async fn set_comment_state(
    conn: &mut PgConnection,
    id: CommentId,
    state: CommentState,
) -> anyhow::Result<u64> {
    let res = sqlx::query("UPDATE comments SET state = $2, updated_at = $3 WHERE id = $1")
        .bind(id.0)
        .bind(state.to_db())
        .bind(Utc::now())
        .execute(conn)
        .await
        .with_context(|| format!("updating state of comment {:?}", id))?;
    Ok(res.rows_affected())
}

pub async fn update_comment_content(
    conn: &mut PgConnection,
    id: CommentId,
    content: &str,
) -> anyhow::Result<u64> {
    let res = sqlx::query("UPDATE comments SET content = $2, updated_at = $3 WHERE id = $1")
        .bind(id.0)
        .bind(content)
        .bind(Utc::now())
        .execute(conn)
        .await
        .with_context(|| format!("updating content of comment {:?}", id))?;
    Ok(res.rows_affected())
}

/// The self-edge row registering a comment in its thread.
#[derive(Clone, Copy, Debug)]
pub struct SelfEdge {
    pub thread_id: ThreadId,
    pub level: i32,
}

pub async fn self_edge(
    conn: &mut PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<SelfEdge>> {
    let row = sqlx::query(
        "SELECT thread_id, level FROM comment_tree WHERE ancestor_id = $1 AND descendant_id = $1",
    )
    .bind(comment.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("querying self-edge of comment {:?}", comment))?;
    row.map(|r| {
        Ok(SelfEdge {
            thread_id: ThreadId(
                r.try_get("thread_id")
                    .context("retrieving the thread_id field")?,
            ),
            level: r.try_get("level").context("retrieving the level field")?,
        })
    })
    .transpose()
}

pub async fn create_notification(
    conn: &mut PgConnection,
    owner: UserId,
    kind: NotificationType,
    content_id: Uuid,
    content: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO notifications (id, type, content_id, content, owner_id, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(kind.to_db())
    .bind(content_id)
    .bind(content)
    .bind(owner.0)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("inserting notification")?;
    Ok(())
}
