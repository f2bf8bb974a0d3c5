use axum::{
    extract::{Path, Query},
    Json,
};
use fadeno_api::{
    Comment, CommentCreate, CommentId, CommentNode, CommentUpdate, ThreadId, Uuid,
};

use crate::{comments::CommentService, extractors::*, Error};

#[derive(Debug, serde::Deserialize)]
pub struct AddCommentParams {
    pub parent_id: Option<Uuid>,
}

pub async fn add_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(thread_id): Path<Uuid>,
    Query(params): Query<AddCommentParams>,
    Json(data): Json<CommentCreate>,
) -> Result<Json<Comment>, Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    Ok(Json(
        service
            .add_comment(
                ThreadId(thread_id),
                data,
                params.parent_id.map(CommentId),
            )
            .await?,
    ))
}

pub async fn get_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<Json<Comment>, Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    Ok(Json(service.get_comment(CommentId(id)).await?))
}

pub async fn update_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
    Json(data): Json<CommentUpdate>,
) -> Result<(), Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    service.update_comment(CommentId(id), data).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<(), Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    service.delete_comment(CommentId(id)).await
}

pub async fn get_thread(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<Vec<CommentNode>>, Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    Ok(Json(service.get_thread(ThreadId(thread_id)).await?))
}

pub async fn delete_all_comments(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(thread_id): Path<Uuid>,
) -> Result<(), Error> {
    let mut service = CommentService {
        conn: &mut *conn,
        user: &user,
    };
    service.delete_all_comments(ThreadId(thread_id)).await
}
