use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use perigee_api::{
    AuthToken, Comment, CommentId, CommentPage, CommentPatch, LikeEcho, NewComment, NewSession,
    NewUser, Sort, SubjectId, User,
};

use crate::{
    db,
    extractors::{AdminAuth, Auth, MaybeAuth, ModerateNew, PgConn, PreAuth},
    Error,
};

pub async fn auth(mut conn: PgConn, Json(data): Json<NewSession>) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or(Error::unauthenticated())?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::unauthenticated()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth, mut conn: PgConn) -> Result<Json<User>, Error> {
    let name = db::user_name(&mut *conn, user)
        .await
        .with_context(|| format!("fetching name for {:?}", user))?;
    Ok(Json(User { id: user, name }))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub sort: Sort,
}

pub async fn list_comments(
    MaybeAuth(viewer): MaybeAuth,
    mut conn: PgConn,
    Path(subject): Path<SubjectId>,
    Query(q): Query<ListQuery>,
) -> Result<Json<CommentPage>, Error> {
    let mut comments = db::list_comments(&mut *conn, viewer, subject)
        .await
        .with_context(|| format!("listing comments on {:?}", subject))?;
    q.sort.sort(&mut comments);
    Ok(Json(CommentPage {
        total: comments.len(),
        comments,
    }))
}

pub async fn create_comment(
    Auth(user): Auth,
    State(moderate): State<ModerateNew>,
    mut conn: PgConn,
    Path(subject): Path<SubjectId>,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    data.validate()?;
    Ok(Json(
        db::create_comment(&mut *conn, user, subject, &data, !moderate.0).await?,
    ))
}

pub async fn edit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
    Json(patch): Json<CommentPatch>,
) -> Result<Json<Comment>, Error> {
    patch.validate()?;
    Ok(Json(db::edit_comment(&mut *conn, user, comment, &patch).await?))
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
) -> Result<(), Error> {
    db::delete_comment(&mut *conn, user, comment).await
}

pub async fn toggle_like(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
) -> Result<Json<LikeEcho>, Error> {
    Ok(Json(db::toggle_like(&mut *conn, user, comment).await?))
}

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn admin_pending_comments(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
) -> Result<Json<Vec<Comment>>, Error> {
    let mut comments = db::pending_comments(&mut *conn)
        .await
        .context("listing pending comments")?;
    Sort::Oldest.sort(&mut comments);
    Ok(Json(comments))
}

pub async fn admin_approve_comment(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Path(comment): Path<CommentId>,
) -> Result<(), Error> {
    db::approve_comment(&mut *conn, comment).await
}
