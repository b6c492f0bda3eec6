use std::cmp::{Ordering, Reverse};

use crate::Comment;

/// Sibling ordering of a thread. Applies independently at every nesting
/// level; it is never inherited from ancestors.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    /// Most liked first; ties broken by earliest `created_at`.
    #[default]
    Best,
    Newest,
    Oldest,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::Best => "best",
            Sort::Newest => "newest",
            Sort::Oldest => "oldest",
        }
    }

    /// The one comparator every implementation must agree on. The id is the
    /// final tie-break so that equal keys still order deterministically.
    pub fn cmp(&self, a: &Comment, b: &Comment) -> Ordering {
        match self {
            Sort::Best => (Reverse(a.like_count), a.created_at, a.id)
                .cmp(&(Reverse(b.like_count), b.created_at, b.id)),
            Sort::Newest => {
                (Reverse(a.created_at), a.id).cmp(&(Reverse(b.created_at), b.id))
            }
            Sort::Oldest => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
        }
    }

    pub fn sort(&self, comments: &mut [Comment]) {
        comments.sort_unstable_by(|a, b| self.cmp(a, b));
    }
}
