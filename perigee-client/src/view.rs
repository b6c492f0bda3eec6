use async_trait::async_trait;

use crate::api::{
    can_reply_at, Comment, CommentId, CommentPage, CommentPatch, Error, LikeEcho, NewComment,
    Sort, SubjectId,
};
use crate::like::LikeTracker;
use crate::mutate::{insert_reply, remove_subtree, update_comment, with_comment_mut, Undo};
use crate::tree::{build_thread, depth_of, find, CommentNode};

/// What a thread view needs from the wire. Implemented by [`HttpConnection`]
/// for real servers and by the mock server for tests.
///
/// [`HttpConnection`]: crate::HttpConnection
#[async_trait]
pub trait Connection {
    async fn list_comments(&self, subject: SubjectId, sort: Sort) -> Result<CommentPage, Error>;
    async fn create_comment(&self, subject: SubjectId, data: &NewComment)
        -> Result<Comment, Error>;
    async fn edit_comment(&self, comment: CommentId, patch: &CommentPatch)
        -> Result<Comment, Error>;
    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error>;
    async fn toggle_like(&self, comment: CommentId) -> Result<LikeEcho, Error>;
}

/// One subject's comment thread as a viewer sees it.
///
/// Owns the assembled forest, the thread-wide total and the like
/// bookkeeping for exactly one viewing context; nothing else mutates them.
/// Mutating calls apply their edit locally first and hold the inverse until
/// the server answers, so a refused round trip leaves the thread exactly as
/// it was.
pub struct ThreadView<C> {
    conn: C,
    subject: SubjectId,
    sort: Sort,
    roots: im::Vector<CommentNode>,
    total: usize,
    likes: LikeTracker,
}

impl<C: Connection> ThreadView<C> {
    pub async fn new(conn: C, subject: SubjectId, sort: Sort) -> Result<ThreadView<C>, Error> {
        let mut this = ThreadView {
            conn,
            subject,
            sort,
            roots: im::Vector::new(),
            total: 0,
            likes: LikeTracker::new(),
        };
        this.refresh().await?;
        Ok(this)
    }

    /// Throws the local forest away and rebuilds it from the server. The
    /// safe fallback whenever local and server state may have diverged.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let CommentPage { comments, total } =
            self.conn.list_comments(self.subject, self.sort).await?;
        self.roots = build_thread(comments, self.sort);
        self.total = total;
        self.likes.reset();
        Ok(())
    }

    pub async fn set_sort(&mut self, sort: Sort) -> Result<(), Error> {
        self.sort = sort;
        self.refresh().await
    }

    pub fn comments(&self) -> &im::Vector<CommentNode> {
        &self.roots
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn find(&self, id: CommentId) -> Option<&CommentNode> {
        find(&self.roots, id)
    }

    /// Whether the reply affordance should show for this comment. Display
    /// logic only; the server re-validates depth on every create.
    pub fn can_reply_to(&self, id: CommentId) -> bool {
        depth_of(&self.roots, id).map(can_reply_at).unwrap_or(false)
    }

    pub fn is_like_pending(&self, id: CommentId) -> bool {
        self.likes.is_pending(id)
    }

    /// Posts a comment and splices the created record into the local forest.
    /// Replies are only sent if the parent is present locally and shallow
    /// enough to accept one; an unconfirmed or vanished parent fails here
    /// without a round trip.
    pub async fn post_comment(&mut self, data: NewComment) -> Result<CommentId, Error> {
        data.validate()?;
        if let Some(parent) = data.parent {
            match depth_of(&self.roots, parent) {
                None => return Err(Error::CommentNotFound(parent)),
                Some(d) if !can_reply_at(d) => return Err(Error::DepthExceeded(parent)),
                Some(_) => (),
            }
        }
        let created = self.conn.create_comment(self.subject, &data).await?;
        let id = created.id;
        match insert_reply(&mut self.roots, created) {
            Ok(_) => self.total += 1,
            // the server accepted a parent we no longer hold; resync
            Err(_) => self.refresh().await?,
        }
        Ok(id)
    }

    /// Rewrites a comment's content, optimistically. On success the local
    /// record is replaced by the server's canonical one; on failure the old
    /// content comes back and the error is surfaced.
    pub async fn edit_comment(&mut self, id: CommentId, patch: CommentPatch) -> Result<(), Error> {
        patch.validate()?;
        let undo = update_comment(&mut self.roots, id, |c| {
            c.content = patch.content.clone();
        })?;
        match self.conn.edit_comment(id, &patch).await {
            Ok(canonical) => {
                if with_comment_mut(&mut self.roots, id, |c| *c = canonical).is_err() {
                    tracing::warn!(comment = %id.0, "edited comment vanished locally");
                }
                Ok(())
            }
            Err(e) => {
                self.rollback(undo);
                Err(e)
            }
        }
    }

    /// Deletes a comment and its whole reply subtree, optimistically.
    /// Returns how many comments went away so callers can report it.
    pub async fn delete_comment(&mut self, id: CommentId) -> Result<usize, Error> {
        let (removed, undo) = remove_subtree(&mut self.roots, id)?;
        match self.conn.delete_comment(id).await {
            Ok(()) => {
                self.total = self.total.saturating_sub(removed);
                Ok(removed)
            }
            Err(e) => {
                self.rollback(undo);
                Err(e)
            }
        }
    }

    /// Toggles the viewer's like, optimistically. Returns the liked state
    /// the tree holds once the round trip settles. A toggle already in
    /// flight for this comment makes the call a no-op reporting the current
    /// state.
    pub async fn toggle_like(&mut self, id: CommentId) -> Result<bool, Error> {
        let flight = match self.likes.begin(&mut self.roots, id)? {
            Some(flight) => flight,
            None => {
                return match self.find(id) {
                    Some(n) => Ok(n.comment.viewer_liked),
                    None => Err(Error::CommentNotFound(id)),
                }
            }
        };
        match self.conn.toggle_like(id).await {
            Ok(echo) => {
                self.likes.settle(&mut self.roots, flight, echo);
                match self.find(id) {
                    Some(n) => Ok(n.comment.viewer_liked),
                    None => Err(Error::CommentNotFound(id)),
                }
            }
            Err(e) => {
                self.likes.fail(&mut self.roots, flight);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, undo: Undo) {
        if undo.apply(&mut self.roots).is_err() {
            tracing::warn!("rollback target vanished locally, thread needs a refresh");
        }
    }
}
