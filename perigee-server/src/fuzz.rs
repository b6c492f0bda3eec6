#![cfg(test)]

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use perigee_api::{
    Author, AuthToken, Comment, CommentId, CommentPage, CommentPatch, Error as ApiError, LikeEcho,
    NewComment, NewSession, NewUser, Sort, SubjectId, User, UserId, Uuid,
};
use perigee_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    postgresfixture::cluster::Cluster::new(
        data,
        runtime.expect("postgresql seems to not be installed in path"),
    )
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = build_pg_cluster(datadir_path);
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::Unauthenticated)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

// TODO: also allow generating invalid requests?
#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser(NewUser),
    Auth {
        uid: usize,
        #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
        device: String,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    ListComments {
        sid: Option<usize>,
        subject: usize,
        sort: Sort,
    },
    PostComment {
        sid: usize,
        subject: usize,
        parent: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(0..150usize))]
        content: String,
    },
    PostCommentWild {
        sid: usize,
        subject: usize,
        data: NewComment,
    },
    EditComment {
        sid: usize,
        comment: usize,
        patch: CommentPatch,
    },
    DeleteComment {
        sid: usize,
        comment: usize,
    },
    ToggleLike {
        sid: usize,
        comment: usize,
    },
    ApproveComment {
        comment: usize,
    },
    PendingComments,
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

fn fuzz_subject(i: usize) -> SubjectId {
    // a handful of subjects is enough to exercise the cross-subject checks
    let i = resize_int(i, ..3).expect("resizing over a non-empty range");
    SubjectId(Uuid::from_u128(1 + i as u128))
}

#[derive(Clone, Copy)]
struct Session {
    app: AuthToken,
    mock: AuthToken,
}

/// The same comment as the app and the mock know it. Both sides pick their
/// ids at random, so results can only be compared after mapping each side's
/// id back to the pair's index.
#[derive(Clone, Copy)]
struct CommentPair {
    app: CommentId,
    mock: CommentId,
}

/// A `Comment` with ids canonicalized and `created_at` dropped, since the
/// two sides run on different clocks.
#[derive(Debug, Eq, PartialEq)]
struct CommentShape {
    id: CommentId,
    subject: SubjectId,
    parent: Option<CommentId>,
    author: Author,
    content: String,
    like_count: u32,
    viewer_liked: bool,
    approved: bool,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
    pairs: Vec<CommentPair>,
}

impl ComparativeFuzzer {
    async fn new(pool: PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool, Some(AuthToken(admin_token)), true).await;
        let mock = MockServer::new(true);
        ComparativeFuzzer {
            admin_token,
            app,
            mock,
            sessions: Vec::new(),
            pairs: Vec::new(),
        }
    }

    async fn ensure_session(&mut self) {
        if self.sessions.is_empty() {
            self.execute_fuzz_op(FuzzOp::Auth {
                uid: 0,
                device: String::from("fuzz"),
            })
            .await;
        }
    }

    fn session(&self, sid: usize) -> Session {
        let i = resize_int(sid, ..self.sessions.len()).expect("session list is empty");
        self.sessions[i]
    }

    fn comment_pair(&self, i: usize) -> CommentPair {
        match resize_int(i, ..self.pairs.len()) {
            Some(i) => self.pairs[i],
            None => {
                // no comment posted yet: aim both sides at the same missing id
                let wild = CommentId(Uuid::new_v4());
                CommentPair {
                    app: wild,
                    mock: wild,
                }
            }
        }
    }

    fn canon_id(&self, id: CommentId, of: fn(&CommentPair) -> CommentId) -> CommentId {
        match self.pairs.iter().position(|p| of(p) == id) {
            Some(i) => CommentId(Uuid::from_u128(i as u128)),
            None => id,
        }
    }

    fn canon_err(&self, err: ApiError, of: fn(&CommentPair) -> CommentId) -> ApiError {
        match err {
            ApiError::CommentNotFound(id) => ApiError::CommentNotFound(self.canon_id(id, of)),
            ApiError::DepthExceeded(id) => ApiError::DepthExceeded(self.canon_id(id, of)),
            e => e,
        }
    }

    fn shape(&self, c: Comment, of: fn(&CommentPair) -> CommentId) -> CommentShape {
        CommentShape {
            id: self.canon_id(c.id, of),
            subject: c.subject,
            parent: c.parent.map(|p| self.canon_id(p, of)),
            author: c.author,
            content: c.content,
            like_count: c.like_count,
            viewer_liked: c.viewer_liked,
            approved: c.approved,
        }
    }

    fn canon_comment_res(
        &self,
        res: Result<Comment, ApiError>,
        of: fn(&CommentPair) -> CommentId,
    ) -> Result<CommentShape, ApiError> {
        match res {
            Ok(c) => Ok(self.shape(c, of)),
            Err(e) => Err(self.canon_err(e, of)),
        }
    }

    fn canon_page_res(
        &self,
        res: Result<CommentPage, ApiError>,
        of: fn(&CommentPair) -> CommentId,
    ) -> Result<(usize, Vec<CommentShape>), ApiError> {
        match res {
            Ok(page) => Ok((page.total, self.canon_comments(page.comments, of))),
            Err(e) => Err(self.canon_err(e, of)),
        }
    }

    fn canon_list_res(
        &self,
        res: Result<Vec<Comment>, ApiError>,
        of: fn(&CommentPair) -> CommentId,
    ) -> Result<Vec<CommentShape>, ApiError> {
        match res {
            Ok(comments) => Ok(self.canon_comments(comments, of)),
            Err(e) => Err(self.canon_err(e, of)),
        }
    }

    fn canon_comments(
        &self,
        comments: Vec<Comment>,
        of: fn(&CommentPair) -> CommentId,
    ) -> Vec<CommentShape> {
        let mut shapes: Vec<CommentShape> =
            comments.into_iter().map(|c| self.shape(c, of)).collect();
        // the sort orders are already pinned down by unit tests, and sorting
        // on wall-clock ties would make this comparison flaky
        shapes.sort_by_key(|s| s.id);
        shapes
    }

    fn canon_err_res<T>(
        &self,
        res: Result<T, ApiError>,
        of: fn(&CommentPair) -> CommentId,
    ) -> Result<T, ApiError> {
        res.map_err(|e| self.canon_err(e, of))
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser(new_user) => {
                // no hashing for tests
                let pass = new_user.initial_password_hash.clone();
                compare(
                    "CreateUser",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/admin/create-user",
                        Some(self.admin_token),
                        &new_user,
                    )
                    .await,
                    self.mock.admin_create_user(new_user, pass),
                )
            }
            FuzzOp::Auth { uid, device } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let (user, password) = self.mock.test_get_user_info(uid);
                    let session = NewSession {
                        user: String::from(user),
                        password: String::from(password),
                        device,
                    };
                    let app_tok =
                        run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                    let mock_tok = self.mock.auth(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser(NewUser {
                        id: UserId::stub(),
                        name: String::from("user"),
                        initial_password_hash: String::from("password"),
                    }))
                    .await;
                    self.execute_fuzz_op(FuzzOp::Auth { uid, device }).await;
                }
            }
            FuzzOp::Unauth { sid } => {
                self.ensure_session().await;
                let i = resize_int(sid, ..self.sessions.len()).expect("session list is empty");
                let s = self.sessions[i];
                let app_res: Result<(), ApiError> =
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(s.app.0), &()).await;
                let mock_res = self.mock.unauth(s.mock);
                if app_res.is_ok() && mock_res.is_ok() {
                    self.sessions.remove(i);
                }
                compare("Unauth", app_res, mock_res);
            }
            FuzzOp::Whoami { sid } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let app_res: Result<User, ApiError> =
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(s.app.0), &()).await;
                compare("Whoami", app_res, self.mock.whoami(s.mock));
            }
            FuzzOp::ListComments { sid, subject, sort } => {
                let (app_tok, mock_tok) = match sid {
                    None => (None, None),
                    Some(sid) => {
                        self.ensure_session().await;
                        let s = self.session(sid);
                        (Some(s.app.0), Some(s.mock))
                    }
                };
                let subject = fuzz_subject(subject);
                let uri = format!(
                    "/api/subjects/{}/comments?sort={}",
                    subject.0,
                    sort.as_str()
                );
                let app_res = run_on_app(&mut self.app, "GET", &uri, app_tok, &()).await;
                let mock_res = self.mock.list_comments(mock_tok, subject, sort);
                compare(
                    "ListComments",
                    self.canon_page_res(app_res, |p| p.app),
                    self.canon_page_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::PostComment {
                sid,
                subject,
                parent,
                content,
            } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let subject = fuzz_subject(subject);
                let parent = parent.map(|p| self.comment_pair(p));
                let app_data = NewComment {
                    content: content.clone(),
                    parent: parent.map(|p| p.app),
                };
                let mock_data = NewComment {
                    content,
                    parent: parent.map(|p| p.mock),
                };
                let uri = format!("/api/subjects/{}/comments", subject.0);
                let app_res: Result<Comment, ApiError> =
                    run_on_app(&mut self.app, "POST", &uri, Some(s.app.0), &app_data).await;
                let mock_res = self.mock.create_comment(s.mock, subject, mock_data);
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.pairs.push(CommentPair {
                        app: app.id,
                        mock: mock.id,
                    });
                }
                compare(
                    "PostComment",
                    self.canon_comment_res(app_res, |p| p.app),
                    self.canon_comment_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::PostCommentWild { sid, subject, data } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let subject = fuzz_subject(subject);
                let uri = format!("/api/subjects/{}/comments", subject.0);
                let app_res: Result<Comment, ApiError> =
                    run_on_app(&mut self.app, "POST", &uri, Some(s.app.0), &data).await;
                let mock_res = self.mock.create_comment(s.mock, subject, data);
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.pairs.push(CommentPair {
                        app: app.id,
                        mock: mock.id,
                    });
                }
                compare(
                    "PostCommentWild",
                    self.canon_comment_res(app_res, |p| p.app),
                    self.canon_comment_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::EditComment {
                sid,
                comment,
                patch,
            } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let pair = self.comment_pair(comment);
                let uri = format!("/api/comments/{}", pair.app.0);
                let app_res: Result<Comment, ApiError> =
                    run_on_app(&mut self.app, "PATCH", &uri, Some(s.app.0), &patch).await;
                let mock_res = self.mock.edit_comment(s.mock, pair.mock, patch);
                compare(
                    "EditComment",
                    self.canon_comment_res(app_res, |p| p.app),
                    self.canon_comment_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::DeleteComment { sid, comment } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let pair = self.comment_pair(comment);
                let uri = format!("/api/comments/{}", pair.app.0);
                let app_res: Result<(), ApiError> =
                    run_on_app(&mut self.app, "DELETE", &uri, Some(s.app.0), &()).await;
                let mock_res = self.mock.delete_comment(s.mock, pair.mock);
                // stale pairs for the subtree just vanish into CommentNotFound
                // on both sides, so there is nothing to clean up here
                compare(
                    "DeleteComment",
                    self.canon_err_res(app_res, |p| p.app),
                    self.canon_err_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::ToggleLike { sid, comment } => {
                self.ensure_session().await;
                let s = self.session(sid);
                let pair = self.comment_pair(comment);
                let uri = format!("/api/comments/{}/like", pair.app.0);
                let app_res: Result<LikeEcho, ApiError> =
                    run_on_app(&mut self.app, "POST", &uri, Some(s.app.0), &()).await;
                let mock_res = self.mock.toggle_like(s.mock, pair.mock);
                compare(
                    "ToggleLike",
                    self.canon_err_res(app_res, |p| p.app),
                    self.canon_err_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::ApproveComment { comment } => {
                let pair = self.comment_pair(comment);
                let uri = format!("/api/admin/approve-comment/{}", pair.app.0);
                let app_res: Result<(), ApiError> =
                    run_on_app(&mut self.app, "POST", &uri, Some(self.admin_token), &()).await;
                let mock_res = self.mock.admin_approve_comment(pair.mock);
                compare(
                    "ApproveComment",
                    self.canon_err_res(app_res, |p| p.app),
                    self.canon_err_res(mock_res, |p| p.mock),
                );
            }
            FuzzOp::PendingComments => {
                let app_res: Result<Vec<Comment>, ApiError> = run_on_app(
                    &mut self.app,
                    "GET",
                    "/api/admin/pending-comments",
                    Some(self.admin_token),
                    &(),
                )
                .await;
                let mock_res = Ok(self.mock.admin_pending_comments());
                compare(
                    "PendingComments",
                    self.canon_list_res(app_res, |p| p.app),
                    self.canon_list_res(mock_res, |p| p.mock),
                );
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
