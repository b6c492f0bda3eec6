use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use perigee_client::{
    api::{
        AuthToken, Comment, CommentId, CommentPage, CommentPatch, Error, LikeEcho, NewComment,
        NewSession, NewUser, Sort, SubjectId, UserId, Uuid,
    },
    Connection, ThreadView,
};
use perigee_mock_server::{MockConn, MockServer};

fn spawn_server(moderate_new: bool) -> Arc<Mutex<MockServer>> {
    Arc::new(Mutex::new(MockServer::new(moderate_new)))
}

fn login(server: &Arc<Mutex<MockServer>>, name: &str) -> AuthToken {
    let mut s = server.lock().unwrap();
    s.admin_create_user(
        NewUser {
            id: UserId(Uuid::new_v4()),
            name: String::from(name),
            initial_password_hash: format!("{name}-secret"),
        },
        format!("{name}-secret"),
    )
    .expect("creating test user");
    s.auth(NewSession {
        user: String::from(name),
        password: format!("{name}-secret"),
        device: String::from("itest"),
    })
    .expect("logging test user in")
}

fn post(content: &str, parent: Option<CommentId>) -> NewComment {
    NewComment {
        content: String::from(content),
        parent,
    }
}

fn root_ids<C: Connection>(view: &ThreadView<C>) -> Vec<CommentId> {
    view.comments().iter().map(|n| n.comment.id).collect()
}

#[tokio::test]
async fn sorts_roots_the_way_each_order_promises() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let grace = login(&server, "grace");
    let lynn = login(&server, "lynn");
    let subject = SubjectId(Uuid::new_v4());

    let conn = MockConn::logged_in(server.clone(), ada);
    let r1 = conn
        .create_comment(subject, &post("first up", None))
        .await
        .unwrap();
    let r2 = conn
        .create_comment(subject, &post("hot take", None))
        .await
        .unwrap();
    for tok in [ada, grace, lynn] {
        MockConn::logged_in(server.clone(), tok)
            .toggle_like(r2.id)
            .await
            .unwrap();
    }

    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), grace),
        subject,
        Sort::Newest,
    )
    .await
    .unwrap();
    assert_eq!(root_ids(&view), vec![r2.id, r1.id]);
    view.set_sort(Sort::Best).await.unwrap();
    assert_eq!(root_ids(&view), vec![r2.id, r1.id]);
    view.set_sort(Sort::Oldest).await.unwrap();
    assert_eq!(root_ids(&view), vec![r1.id, r2.id]);
    assert_eq!(view.find(r2.id).unwrap().comment.like_count, 3);
}

#[tokio::test]
async fn hides_the_reply_affordance_at_the_depth_limit() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), ada),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();

    let root = view.post_comment(post("go for launch", None)).await.unwrap();
    let branch = view
        .post_comment(post("copy that", Some(root)))
        .await
        .unwrap();
    let leaf = view.post_comment(post("ack", Some(branch))).await.unwrap();
    assert_eq!(view.total(), 3);

    assert!(view.can_reply_to(root));
    assert!(view.can_reply_to(branch));
    assert!(!view.can_reply_to(leaf));

    let res = view.post_comment(post("one more", Some(leaf))).await;
    assert!(matches!(res, Err(Error::DepthExceeded(p)) if p == leaf));
    assert_eq!(view.total(), 3);
}

#[tokio::test]
async fn store_rechecks_depth_even_when_the_client_does_not() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let conn = MockConn::logged_in(server.clone(), ada);

    let root = conn
        .create_comment(subject, &post("go for launch", None))
        .await
        .unwrap();
    let branch = conn
        .create_comment(subject, &post("copy", Some(root.id)))
        .await
        .unwrap();
    let leaf = conn
        .create_comment(subject, &post("ack", Some(branch.id)))
        .await
        .unwrap();

    let res = conn
        .create_comment(subject, &post("one more", Some(leaf.id)))
        .await;
    assert!(matches!(res, Err(Error::DepthExceeded(p)) if p == leaf.id));
}

#[tokio::test]
async fn toggling_a_like_twice_lands_back_where_it_started() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), ada),
        subject,
        Sort::Best,
    )
    .await
    .unwrap();
    let id = view
        .post_comment(post("orbital mechanics", None))
        .await
        .unwrap();

    assert!(view.toggle_like(id).await.unwrap());
    {
        let c = &view.find(id).unwrap().comment;
        assert!(c.viewer_liked);
        assert_eq!(c.like_count, 1);
    }

    assert!(!view.toggle_like(id).await.unwrap());
    {
        let c = &view.find(id).unwrap().comment;
        assert!(!c.viewer_liked);
        assert_eq!(c.like_count, 0);
    }

    // and the server agrees
    view.refresh().await.unwrap();
    let c = &view.find(id).unwrap().comment;
    assert!(!c.viewer_liked);
    assert_eq!(c.like_count, 0);
}

#[tokio::test]
async fn deleting_a_comment_takes_its_replies_along() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), ada),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();

    let a = view.post_comment(post("thread root", None)).await.unwrap();
    let b = view.post_comment(post("reply", Some(a))).await.unwrap();
    let c = view
        .post_comment(post("nested reply", Some(b)))
        .await
        .unwrap();
    let d = view.post_comment(post("bystander", None)).await.unwrap();
    assert_eq!(view.total(), 4);

    assert_eq!(view.delete_comment(b).await.unwrap(), 2);
    assert_eq!(view.total(), 2);
    assert!(view.find(a).unwrap().replies.is_empty());
    assert!(view.find(b).is_none());
    assert!(view.find(c).is_none());
    assert!(view.find(d).is_some());

    // a fresh fetch shows the server dropped the subtree too
    view.refresh().await.unwrap();
    assert_eq!(view.total(), 2);
    assert!(view.find(b).is_none());
}

#[tokio::test]
async fn editing_rewrites_only_the_target_comment() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), ada),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();

    let a = view.post_comment(post("typo hre", None)).await.unwrap();
    let b = view.post_comment(post("unrelated", None)).await.unwrap();
    assert!(view.find(a).unwrap().comment.author.is_viewer);

    view.edit_comment(
        a,
        CommentPatch {
            content: String::from("typo here"),
        },
    )
    .await
    .unwrap();
    assert_eq!(view.find(a).unwrap().comment.content, "typo here");
    assert_eq!(view.find(b).unwrap().comment.content, "unrelated");

    view.refresh().await.unwrap();
    assert_eq!(view.find(a).unwrap().comment.content, "typo here");
}

#[tokio::test]
async fn only_the_author_may_edit_or_delete() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let grace = login(&server, "grace");
    let subject = SubjectId(Uuid::new_v4());
    let id = MockConn::logged_in(server.clone(), ada)
        .create_comment(subject, &post("mine", None))
        .await
        .unwrap()
        .id;

    let mut view = ThreadView::new(
        MockConn::logged_in(server.clone(), grace),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();
    assert!(!view.find(id).unwrap().comment.author.is_viewer);

    let edit = view
        .edit_comment(
            id,
            CommentPatch {
                content: String::from("vandalism"),
            },
        )
        .await;
    assert!(matches!(edit, Err(Error::PermissionDenied)));
    // the rollback left the original content in place
    assert_eq!(view.find(id).unwrap().comment.content, "mine");

    let del = view.delete_comment(id).await;
    assert!(matches!(del, Err(Error::PermissionDenied)));
    assert_eq!(view.total(), 1);
}

#[tokio::test]
async fn pending_comments_stay_between_author_and_moderators() {
    let server = spawn_server(true);
    let ada = login(&server, "ada");
    let grace = login(&server, "grace");
    let subject = SubjectId(Uuid::new_v4());

    let mut ada_view = ThreadView::new(
        MockConn::logged_in(server.clone(), ada),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();
    let pending = ada_view
        .post_comment(post("waiting for review", None))
        .await
        .unwrap();
    assert_eq!(ada_view.total(), 1);
    assert!(!ada_view.find(pending).unwrap().comment.approved);

    let grace_view = ThreadView::new(
        MockConn::logged_in(server.clone(), grace),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();
    assert_eq!(grace_view.total(), 0);

    let anon_view = ThreadView::new(MockConn::anonymous(server.clone()), subject, Sort::Oldest)
        .await
        .unwrap();
    assert_eq!(anon_view.total(), 0);

    {
        let mut s = server.lock().unwrap();
        let queue: Vec<CommentId> = s.admin_pending_comments().iter().map(|c| c.id).collect();
        assert_eq!(queue, vec![pending]);
        s.admin_approve_comment(pending).unwrap();
    }

    let approved_view = ThreadView::new(
        MockConn::logged_in(server.clone(), grace),
        subject,
        Sort::Oldest,
    )
    .await
    .unwrap();
    assert_eq!(approved_view.total(), 1);
    assert!(approved_view.find(pending).unwrap().comment.approved);
}

#[tokio::test]
async fn anonymous_viewers_can_read_but_not_post() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    MockConn::logged_in(server.clone(), ada)
        .create_comment(subject, &post("public record", None))
        .await
        .unwrap();

    let mut view = ThreadView::new(MockConn::anonymous(server.clone()), subject, Sort::Best)
        .await
        .unwrap();
    assert_eq!(view.total(), 1);

    let res = view.post_comment(post("drive by", None)).await;
    assert!(matches!(res, Err(Error::Unauthenticated)));
    assert_eq!(view.total(), 1);
}

/// Forwards to the mock server but simulates a dead network for the
/// operations a test wants to see fail.
struct Unplugged {
    inner: MockConn,
    drop_deletes: bool,
    drop_likes: bool,
}

impl Unplugged {
    fn pulled() -> Error {
        Error::Network(String::from("connection reset by test"))
    }
}

#[async_trait]
impl Connection for Unplugged {
    async fn list_comments(&self, subject: SubjectId, sort: Sort) -> Result<CommentPage, Error> {
        self.inner.list_comments(subject, sort).await
    }

    async fn create_comment(
        &self,
        subject: SubjectId,
        data: &NewComment,
    ) -> Result<Comment, Error> {
        self.inner.create_comment(subject, data).await
    }

    async fn edit_comment(
        &self,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, Error> {
        self.inner.edit_comment(comment, patch).await
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        match self.drop_deletes {
            true => Err(Self::pulled()),
            false => self.inner.delete_comment(comment).await,
        }
    }

    async fn toggle_like(&self, comment: CommentId) -> Result<LikeEcho, Error> {
        match self.drop_likes {
            true => Err(Self::pulled()),
            false => self.inner.toggle_like(comment).await,
        }
    }
}

#[tokio::test]
async fn a_failed_like_rolls_the_tree_back() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let id = MockConn::logged_in(server.clone(), ada)
        .create_comment(subject, &post("hold", None))
        .await
        .unwrap()
        .id;

    let conn = Unplugged {
        inner: MockConn::logged_in(server.clone(), ada),
        drop_deletes: false,
        drop_likes: true,
    };
    let mut view = ThreadView::new(conn, subject, Sort::Oldest).await.unwrap();

    let res = view.toggle_like(id).await;
    assert!(matches!(&res, Err(e) if e.is_transient()));
    let c = &view.find(id).unwrap().comment;
    assert!(!c.viewer_liked);
    assert_eq!(c.like_count, 0);
    assert!(!view.is_like_pending(id));
}

#[tokio::test]
async fn a_failed_delete_restores_the_subtree_in_place() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let conn = Unplugged {
        inner: MockConn::logged_in(server.clone(), ada),
        drop_deletes: true,
        drop_likes: false,
    };
    let mut view = ThreadView::new(conn, subject, Sort::Oldest).await.unwrap();

    let a = view.post_comment(post("root", None)).await.unwrap();
    let b = view.post_comment(post("reply", Some(a))).await.unwrap();
    let c = view
        .post_comment(post("deep reply", Some(b)))
        .await
        .unwrap();

    let res = view.delete_comment(b).await;
    assert!(matches!(res, Err(Error::Network(_))));
    assert_eq!(view.total(), 3);
    let a_node = view.find(a).unwrap();
    assert_eq!(a_node.replies.len(), 1);
    assert_eq!(a_node.replies[0].comment.id, b);
    assert!(view.find(c).is_some());
}

/// A connection whose create echo claims a parent the local tree has never
/// seen, as happens when the thread moved under the viewer's feet.
struct Drifted {
    inner: MockConn,
    ghost: CommentId,
}

#[async_trait]
impl Connection for Drifted {
    async fn list_comments(&self, subject: SubjectId, sort: Sort) -> Result<CommentPage, Error> {
        self.inner.list_comments(subject, sort).await
    }

    async fn create_comment(
        &self,
        subject: SubjectId,
        data: &NewComment,
    ) -> Result<Comment, Error> {
        let mut created = self.inner.create_comment(subject, data).await?;
        created.parent = Some(self.ghost);
        Ok(created)
    }

    async fn edit_comment(
        &self,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, Error> {
        self.inner.edit_comment(comment, patch).await
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        self.inner.delete_comment(comment).await
    }

    async fn toggle_like(&self, comment: CommentId) -> Result<LikeEcho, Error> {
        self.inner.toggle_like(comment).await
    }
}

#[tokio::test]
async fn a_confirmed_comment_under_an_unknown_parent_triggers_a_refetch() {
    let server = spawn_server(false);
    let ada = login(&server, "ada");
    let subject = SubjectId(Uuid::new_v4());
    let conn = Drifted {
        inner: MockConn::logged_in(server.clone(), ada),
        ghost: CommentId(Uuid::new_v4()),
    };
    let mut view = ThreadView::new(conn, subject, Sort::Oldest).await.unwrap();

    let id = view.post_comment(post("am I anchored?", None)).await.unwrap();

    // the echo pointed at a parent we do not hold, so the view refetched
    // and now shows the server's truth: one root comment
    assert_eq!(view.total(), 1);
    let node = view.find(id).unwrap();
    assert_eq!(node.comment.parent, None);
}
