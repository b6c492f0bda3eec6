use async_trait::async_trait;

use crate::api::{
    AuthToken, Comment, CommentId, CommentPage, CommentPatch, Error, LikeEcho, NewComment,
    NewSession, Sort, SubjectId, User,
};
use crate::view::Connection;

/// [`Connection`] over a real perigee server.
///
/// Holds the session token once `auth` succeeds; anonymous reads work
/// without one. Transport-level failures come back as [`Error::Network`],
/// everything else is whatever error the server put in the body.
pub struct HttpConnection {
    client: reqwest::Client,
    base: String,
    token: Option<AuthToken>,
}

impl HttpConnection {
    pub fn new(base: String) -> HttpConnection {
        HttpConnection {
            client: reqwest::Client::new(),
            base,
            token: None,
        }
    }

    pub fn with_token(base: String, token: AuthToken) -> HttpConnection {
        HttpConnection {
            token: Some(token),
            ..HttpConnection::new(base)
        }
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token
    }

    pub async fn auth(&mut self, session: &NewSession) -> Result<AuthToken, Error> {
        let token: AuthToken = recv(self.client.post(self.url("auth")).json(session)).await?;
        self.token = Some(token);
        Ok(token)
    }

    pub async fn unauth(&mut self) -> Result<(), Error> {
        recv_empty(self.prepare(self.client.post(self.url("unauth")))).await?;
        self.token = None;
        Ok(())
    }

    pub async fn whoami(&self) -> Result<User, Error> {
        recv(self.prepare(self.client.get(self.url("whoami")))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base, path)
    }

    fn prepare(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(token) => req.bearer_auth(token.0),
            None => req,
        }
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn list_comments(&self, subject: SubjectId, sort: Sort) -> Result<CommentPage, Error> {
        let url = self.url(&format!("subjects/{}/comments", subject.0));
        recv(self.prepare(self.client.get(url).query(&[("sort", sort.as_str())]))).await
    }

    async fn create_comment(
        &self,
        subject: SubjectId,
        data: &NewComment,
    ) -> Result<Comment, Error> {
        let url = self.url(&format!("subjects/{}/comments", subject.0));
        recv(self.prepare(self.client.post(url).json(data))).await
    }

    async fn edit_comment(
        &self,
        comment: CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, Error> {
        let url = self.url(&format!("comments/{}", comment.0));
        recv(self.prepare(self.client.patch(url).json(patch))).await
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        let url = self.url(&format!("comments/{}", comment.0));
        recv_empty(self.prepare(self.client.delete(url))).await
    }

    async fn toggle_like(&self, comment: CommentId) -> Result<LikeEcho, Error> {
        let url = self.url(&format!("comments/{}/like", comment.0));
        recv(self.prepare(self.client.post(url))).await
    }
}

async fn recv<R>(req: reqwest::RequestBuilder) -> Result<R, Error>
where
    R: for<'de> serde::Deserialize<'de>,
{
    let resp = checked(req).await?;
    resp.json()
        .await
        .map_err(|e| Error::Network(format!("reading response body: {e}")))
}

async fn recv_empty(req: reqwest::RequestBuilder) -> Result<(), Error> {
    checked(req).await.map(|_| ())
}

async fn checked(req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
    let resp = req
        .send()
        .await
        .map_err(|e| Error::Network(format!("sending request: {e}")))?;
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| Error::Network(format!("reading error body: {e}")))?;
    Err(Error::parse(&body)
        .unwrap_or_else(|_| Error::Unknown(format!("got status {status} with opaque body"))))
}
