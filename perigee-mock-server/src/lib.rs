use std::{
    collections::{btree_map, BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::TimeZone;
use perigee_client::{
    api::{
        can_reply_at, Author, AuthToken, Comment, CommentId, CommentPage, CommentPatch, Error,
        LikeEcho, NewComment, NewSession, NewUser, Sort, SubjectId, Time, User, UserId, Uuid,
    },
    Connection,
};

/// In-memory stand-in for a perigee server.
///
/// Holds the same state the real one keeps in Postgres and applies the same
/// checks in the same order, so a client (or the comparative fuzzer) cannot
/// tell them apart through the API.
pub struct MockServer {
    users: BTreeMap<UserId, DbUser>,
    comments: BTreeMap<CommentId, DbComment>,
    moderate_new: bool,
    now: i64,
}

#[derive(Debug)]
struct DbUser {
    // uid is the map key
    name: String,
    pass: String,
    pass_hash: String,
    sessions: HashMap<AuthToken, Device>,
}

#[derive(Debug)]
struct DbComment {
    subject: SubjectId,
    parent: Option<CommentId>,
    author: UserId,
    content: String,
    created_at: Time,
    approved: bool,
    liked_by: BTreeSet<UserId>,
}

#[derive(Debug)]
struct Device(String);

impl MockServer {
    pub fn new(moderate_new: bool) -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            comments: BTreeMap::new(),
            moderate_new,
            now: 0,
        }
    }

    /// Return name & pass for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (&str, &str) {
        let u = self
            .users
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()));
        (&u.name, &u.pass)
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    pub fn admin_create_user(&mut self, u: NewUser, password: String) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    name: u.name,
                    pass: password,
                    pass_hash: u.initial_password_hash,
                    sessions: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        for u in self.users.values_mut() {
            if u.name == s.user {
                // tests (of which mock-server is a part of) don't actually use bcrypt
                if s.password != u.pass_hash {
                    return Err(Error::Unauthenticated);
                } else {
                    let tok = AuthToken(Uuid::new_v4());
                    u.sessions.insert(tok, Device(s.device));
                    return Ok(tok);
                }
            }
        }
        Err(Error::Unauthenticated)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        for u in self.users.values_mut() {
            if u.sessions.remove(&tok).is_some() {
                return Ok(());
            }
        }
        Err(Error::Unauthenticated)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<User, Error> {
        let uid = self.resolve(tok)?;
        Ok(User {
            id: uid,
            name: self.user_name(uid),
        })
    }

    pub fn list_comments(
        &self,
        tok: Option<AuthToken>,
        subject: SubjectId,
        sort: Sort,
    ) -> Result<CommentPage, Error> {
        let viewer = match tok {
            Some(tok) => Some(self.resolve(tok)?),
            None => None,
        };
        let mut comments: Vec<Comment> = self
            .comments
            .iter()
            .filter(|(_, c)| c.subject == subject && self.visible_to(c, viewer))
            .map(|(id, _)| self.render(*id, viewer))
            .collect();
        sort.sort(&mut comments);
        Ok(CommentPage {
            total: comments.len(),
            comments,
        })
    }

    pub fn create_comment(
        &mut self,
        tok: AuthToken,
        subject: SubjectId,
        data: NewComment,
    ) -> Result<Comment, Error> {
        let author = self.resolve(tok)?;
        data.validate()?;
        if let Some(parent) = data.parent {
            match self.comments.get(&parent) {
                None => return Err(Error::CommentNotFound(parent)),
                Some(p) if p.subject != subject => return Err(Error::CommentNotFound(parent)),
                Some(p) if !self.visible_to(p, Some(author)) => {
                    return Err(Error::CommentNotFound(parent))
                }
                Some(_) => (),
            }
            if !can_reply_at(self.depth_of(parent)) {
                return Err(Error::DepthExceeded(parent));
            }
        }
        let id = CommentId(Uuid::new_v4());
        let created_at = self.tick();
        self.comments.insert(
            id,
            DbComment {
                subject,
                parent: data.parent,
                author,
                content: data.content,
                created_at,
                approved: !self.moderate_new,
                liked_by: BTreeSet::new(),
            },
        );
        Ok(self.render(id, Some(author)))
    }

    pub fn edit_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
        patch: CommentPatch,
    ) -> Result<Comment, Error> {
        let viewer = self.resolve(tok)?;
        patch.validate()?;
        let c = match self.comments.get_mut(&comment) {
            None => return Err(Error::CommentNotFound(comment)),
            Some(c) => c,
        };
        if !(c.approved || c.author == viewer) {
            return Err(Error::CommentNotFound(comment));
        }
        if c.author != viewer {
            return Err(Error::PermissionDenied);
        }
        c.content = patch.content;
        Ok(self.render(comment, Some(viewer)))
    }

    pub fn delete_comment(&mut self, tok: AuthToken, comment: CommentId) -> Result<(), Error> {
        let viewer = self.resolve(tok)?;
        let c = match self.comments.get(&comment) {
            None => return Err(Error::CommentNotFound(comment)),
            Some(c) => c,
        };
        if !self.visible_to(c, Some(viewer)) {
            return Err(Error::CommentNotFound(comment));
        }
        if c.author != viewer {
            return Err(Error::PermissionDenied);
        }
        let mut doomed = vec![comment];
        let mut i = 0;
        while i < doomed.len() {
            let cur = doomed[i];
            doomed.extend(
                self.comments
                    .iter()
                    .filter(|(_, c)| c.parent == Some(cur))
                    .map(|(id, _)| *id),
            );
            i += 1;
        }
        for id in doomed {
            self.comments.remove(&id);
        }
        Ok(())
    }

    pub fn toggle_like(&mut self, tok: AuthToken, comment: CommentId) -> Result<LikeEcho, Error> {
        let viewer = self.resolve(tok)?;
        let c = match self.comments.get_mut(&comment) {
            None => return Err(Error::CommentNotFound(comment)),
            Some(c) => c,
        };
        if !(c.approved || c.author == viewer) {
            return Err(Error::CommentNotFound(comment));
        }
        let liked = if c.liked_by.remove(&viewer) {
            false
        } else {
            c.liked_by.insert(viewer);
            true
        };
        Ok(LikeEcho { liked })
    }

    pub fn admin_pending_comments(&self) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .comments
            .iter()
            .filter(|(_, c)| !c.approved)
            .map(|(id, _)| self.render(*id, None))
            .collect();
        Sort::Oldest.sort(&mut comments);
        comments
    }

    pub fn admin_approve_comment(&mut self, comment: CommentId) -> Result<(), Error> {
        match self.comments.get_mut(&comment) {
            None => Err(Error::CommentNotFound(comment)),
            Some(c) => {
                c.approved = true;
                Ok(())
            }
        }
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        for (uid, u) in self.users.iter() {
            if u.sessions.contains_key(&tok) {
                return Ok(*uid);
            }
        }
        Err(Error::Unauthenticated)
    }

    fn user_name(&self, uid: UserId) -> String {
        self.users
            .get(&uid)
            .map(|u| u.name.clone())
            .unwrap_or_default()
    }

    fn visible_to(&self, c: &DbComment, viewer: Option<UserId>) -> bool {
        c.approved || viewer == Some(c.author)
    }

    fn depth_of(&self, mut id: CommentId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.comments.get(&id).and_then(|c| c.parent) {
            depth += 1;
            id = parent;
        }
        depth
    }

    fn render(&self, id: CommentId, viewer: Option<UserId>) -> Comment {
        let c = &self.comments[&id];
        Comment {
            id,
            subject: c.subject,
            parent: c.parent,
            author: Author {
                id: c.author,
                name: self.user_name(c.author),
                is_viewer: viewer == Some(c.author),
            },
            content: c.content.clone(),
            created_at: c.created_at,
            like_count: c.liked_by.len() as u32,
            viewer_liked: viewer.map(|v| c.liked_by.contains(&v)).unwrap_or(false),
            approved: c.approved,
        }
    }

    // one second per write keeps created_at strictly ordered and deterministic
    fn tick(&mut self) -> Time {
        self.now += 1;
        chrono::Utc
            .timestamp_opt(1_600_000_000 + self.now, 0)
            .unwrap()
    }
}

/// [`Connection`] over a [`MockServer`] behind a mutex, for driving a
/// `ThreadView` in tests without a network or a database.
pub struct MockConn {
    server: Arc<Mutex<MockServer>>,
    token: Option<AuthToken>,
}

impl MockConn {
    pub fn anonymous(server: Arc<Mutex<MockServer>>) -> MockConn {
        MockConn {
            server,
            token: None,
        }
    }

    pub fn logged_in(server: Arc<Mutex<MockServer>>, token: AuthToken) -> MockConn {
        MockConn {
            server,
            token: Some(token),
        }
    }

    fn server(&self) -> std::sync::MutexGuard<'_, MockServer> {
        self.server.lock().expect("mock server mutex poisoned")
    }

    fn token(&self) -> Result<AuthToken, Error> {
        self.token.ok_or(Error::Unauthenticated)
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn list_comments(&self, subject: SubjectId, sort: Sort) -> Result<CommentPage, Error> {
        self.server().list_comments(self.token, subject, sort)
    }

    async fn create_comment(
        &self,
        subject: SubjectId,
        data: &NewComment,
    ) -> Result<Comment, Error> {
        self.server()
            .create_comment(self.token()?, subject, data.clone())
    }

    async fn edit_comment(
        &self,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, Error> {
        self.server()
            .edit_comment(self.token()?, comment, patch.clone())
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        self.server().delete_comment(self.token()?, comment)
    }

    async fn toggle_like(&self, comment: CommentId) -> Result<LikeEcho, Error> {
        self.server().toggle_like(self.token()?, comment)
    }
}
