mod http;
pub use http::HttpConnection;

mod like;
pub use like::{LikeFlight, LikeTracker};

mod mutate;
pub use mutate::{insert_reply, remove_subtree, update_comment, Undo};

mod tree;
pub use tree::{build_thread, count, depth_of, find, flatten, CommentNode};

mod view;
pub use view::{Connection, ThreadView};

pub mod api {
    pub use perigee_api::*;
}
