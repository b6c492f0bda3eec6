use uuid::Uuid;

use crate::{Error, Time, UserId, STUB_UUID};

/// Maximum nesting depth of a thread. Roots are at depth 0, so with
/// `MAX_DEPTH = 3` the deepest comment that can exist sits at depth 2.
pub const MAX_DEPTH: usize = 3;

/// Maximum byte length of a comment body.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Whether a comment sitting at `depth` may receive replies.
///
/// Enforced both by clients (to hide the reply affordance) and by the server
/// (to reject the insert); client-side hiding is not a security boundary.
pub fn can_reply_at(depth: usize) -> bool {
    depth + 1 < MAX_DEPTH
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct CommentId(#[generator(bolero::generator::gen_arbitrary())] pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct SubjectId(#[generator(bolero::generator::gen_arbitrary())] pub Uuid);

impl SubjectId {
    pub fn stub() -> SubjectId {
        SubjectId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,

    /// True iff the author is the requesting viewer, ie. the viewer may edit
    /// and delete this comment.
    #[serde(rename = "is_owner")]
    pub is_viewer: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    #[serde(rename = "subject_id")]
    pub subject: SubjectId,

    /// None for a root comment.
    #[serde(rename = "parent_id")]
    pub parent: Option<CommentId>,

    pub author: Author,
    pub content: String,
    pub created_at: Time,

    /// Number of distinct users who currently like this comment.
    pub like_count: u32,

    /// Whether the requesting viewer is one of them. Always false for
    /// anonymous requests.
    pub viewer_liked: bool,

    /// False while the comment is held for moderation. Unapproved comments
    /// are only ever served to their author.
    #[serde(rename = "is_approved")]
    pub approved: bool,
}

#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct NewComment {
    #[generator(bolero::generator::gen_with::<String>().len(0..150usize))]
    pub content: String,
    #[serde(rename = "parent_id")]
    pub parent: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        validate_content(&self.content)
    }
}

#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct CommentPatch {
    #[generator(bolero::generator::gen_with::<String>().len(0..150usize))]
    pub content: String,
}

impl CommentPatch {
    pub fn validate(&self) -> Result<(), Error> {
        validate_content(&self.content)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPage {
    /// Flat, moderation-filtered list; nesting is for clients to rebuild.
    pub comments: Vec<Comment>,
    pub total: usize,
}

/// Server's answer to a like toggle: the state the toggle left the pair
/// (comment, viewer) in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LikeEcho {
    pub liked: bool,
}

fn validate_content(content: &str) -> Result<(), Error> {
    crate::validate_string(content)?;
    if content.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(Error::ContentTooLong {
            len: content.len(),
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(())
}
