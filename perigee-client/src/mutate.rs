use crate::api::{Comment, CommentId, Error};
use crate::tree::{self, CommentNode};

/// Inverse of one structural edit, captured when the edit is applied.
///
/// Optimistic callers hold onto it until the server answers: confirmation
/// drops it, refusal applies it. Applying an `Undo` against the forest the
/// paired edit ran on always restores that forest exactly.
#[derive(Clone, Debug)]
pub enum Undo {
    /// Undoes an insertion.
    Remove(CommentId),

    /// Undoes a field update, restoring the full previous record.
    Restore(Box<Comment>),

    /// Undoes a subtree removal, splicing the subtree back at its old
    /// position among its old siblings.
    Reinsert {
        parent: Option<CommentId>,
        index: usize,
        node: Box<CommentNode>,
    },
}

impl Undo {
    pub fn apply(self, nodes: &mut im::Vector<CommentNode>) -> Result<(), Error> {
        match self {
            Undo::Remove(id) => remove_subtree(nodes, id).map(|_| ()),
            Undo::Restore(old) => with_comment_mut(nodes, old.id, |c| *c = *old),
            Undo::Reinsert {
                parent,
                index,
                node,
            } => {
                let level = match parent {
                    None => nodes,
                    Some(p) => {
                        &mut tree::find_mut(nodes, p)
                            .ok_or(Error::CommentNotFound(p))?
                            .replies
                    }
                };
                level.insert(index.min(level.len()), *node);
                Ok(())
            }
        }
    }
}

/// Attaches `comment` under its parent, or to the root list for a root
/// comment. New siblings go last; ordering re-normalizes on the next rebuild.
pub fn insert_reply(
    nodes: &mut im::Vector<CommentNode>,
    comment: Comment,
) -> Result<Undo, Error> {
    let id = comment.id;
    let node = CommentNode {
        comment,
        replies: im::Vector::new(),
    };
    match node.comment.parent {
        None => nodes.push_back(node),
        Some(p) => tree::find_mut(nodes, p)
            .ok_or(Error::CommentNotFound(p))?
            .replies
            .push_back(node),
    }
    Ok(Undo::Remove(id))
}

/// Applies `patch` to the matching comment and returns the inverse. Only the
/// path from the root to the touched node is reallocated; clones of the
/// forest taken before the call keep the old record.
pub fn update_comment<F>(
    nodes: &mut im::Vector<CommentNode>,
    id: CommentId,
    patch: F,
) -> Result<Undo, Error>
where
    F: FnOnce(&mut Comment),
{
    match tree::find_mut(nodes, id) {
        Some(node) => {
            let before = node.comment.clone();
            patch(&mut node.comment);
            Ok(Undo::Restore(Box::new(before)))
        }
        None => Err(Error::CommentNotFound(id)),
    }
}

/// Detaches the comment and its whole reply subtree. Returns how many nodes
/// went away with it, so callers can keep a thread-wide total honest.
pub fn remove_subtree(
    nodes: &mut im::Vector<CommentNode>,
    id: CommentId,
) -> Result<(usize, Undo), Error> {
    match detach(nodes, None, id) {
        Some((parent, index, node)) => {
            let removed = 1 + tree::count(&node.replies);
            Ok((
                removed,
                Undo::Reinsert {
                    parent,
                    index,
                    node: Box::new(node),
                },
            ))
        }
        None => Err(Error::CommentNotFound(id)),
    }
}

fn detach(
    nodes: &mut im::Vector<CommentNode>,
    parent: Option<CommentId>,
    id: CommentId,
) -> Option<(Option<CommentId>, usize, CommentNode)> {
    if let Some(index) = nodes.iter().position(|n| n.comment.id == id) {
        return Some((parent, index, nodes.remove(index)));
    }
    for n in nodes.iter_mut() {
        let here = n.comment.id;
        if let Some(res) = detach(&mut n.replies, Some(here), id) {
            return Some(res);
        }
    }
    None
}

pub(crate) fn with_comment_mut<F>(
    nodes: &mut im::Vector<CommentNode>,
    id: CommentId,
    patch: F,
) -> Result<(), Error>
where
    F: FnOnce(&mut Comment),
{
    match tree::find_mut(nodes, id) {
        Some(node) => {
            patch(&mut node.comment);
            Ok(())
        }
        None => Err(Error::CommentNotFound(id)),
    }
}
