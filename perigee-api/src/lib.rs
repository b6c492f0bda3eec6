use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
mod comment;
mod error;
mod sort;
mod user;

pub use auth::{AuthToken, NewSession, NewUser};
pub use comment::{
    can_reply_at, Author, Comment, CommentId, CommentPage, CommentPatch, LikeEcho, NewComment,
    SubjectId, MAX_CONTENT_LEN, MAX_DEPTH,
};
pub use error::Error;
pub use sort::Sort;
pub use user::{User, UserId};

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        Err(Error::NullByteInString(String::from(s)))
    } else {
        Ok(())
    }
}
