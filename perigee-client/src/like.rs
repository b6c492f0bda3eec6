use std::collections::HashSet;

use crate::api::{CommentId, Error, LikeEcho};
use crate::mutate::with_comment_mut;
use crate::tree::CommentNode;

/// Receipt for one in-flight toggle: the state to come back to if the round
/// trip fails or the server disagrees with the optimistic guess.
#[derive(Clone, Copy, Debug)]
pub struct LikeFlight {
    pub comment: CommentId,
    was_liked: bool,
    was_count: u32,
}

/// Bookkeeping for the optimistic like counter of one thread.
///
/// A comment has at most one toggle in flight; taps that land while it is
/// pending are dropped, so the counter cannot drift under double-taps.
#[derive(Debug, Default)]
pub struct LikeTracker {
    in_flight: HashSet<CommentId>,
}

impl LikeTracker {
    pub fn new() -> LikeTracker {
        LikeTracker::default()
    }

    /// Flips the comment optimistically and reserves it until `settle` or
    /// `fail`. `Ok(None)` means a toggle is already pending for this comment
    /// and the tap was dropped.
    pub fn begin(
        &mut self,
        nodes: &mut im::Vector<CommentNode>,
        id: CommentId,
    ) -> Result<Option<LikeFlight>, Error> {
        if self.in_flight.contains(&id) {
            return Ok(None);
        }
        let mut flight = None;
        with_comment_mut(nodes, id, |c| {
            flight = Some(LikeFlight {
                comment: id,
                was_liked: c.viewer_liked,
                was_count: c.like_count,
            });
            if c.viewer_liked {
                c.like_count = c.like_count.saturating_sub(1);
            } else {
                c.like_count += 1;
            }
            c.viewer_liked = !c.viewer_liked;
        })?;
        self.in_flight.insert(id);
        Ok(flight)
    }

    /// Records the server's answer for a flight. On agreement the optimistic
    /// values stand; on disagreement the comment reverts to its pre-toggle
    /// state, which is the state the echoed flag describes.
    pub fn settle(
        &mut self,
        nodes: &mut im::Vector<CommentNode>,
        flight: LikeFlight,
        echo: LikeEcho,
    ) {
        if !self.in_flight.remove(&flight.comment) {
            // reset() ran while the call was in flight; the receipt no longer
            // describes the tree we hold
            return;
        }
        let res = with_comment_mut(nodes, flight.comment, |c| {
            if c.viewer_liked != echo.liked {
                c.viewer_liked = flight.was_liked;
                c.like_count = flight.was_count;
            }
        });
        if res.is_err() {
            tracing::warn!(
                comment = %flight.comment.0,
                "settled a like for a comment no longer in the tree"
            );
        }
    }

    /// Rolls the optimistic flip back after a failed round trip.
    pub fn fail(&mut self, nodes: &mut im::Vector<CommentNode>, flight: LikeFlight) {
        if !self.in_flight.remove(&flight.comment) {
            return;
        }
        let res = with_comment_mut(nodes, flight.comment, |c| {
            c.viewer_liked = flight.was_liked;
            c.like_count = flight.was_count;
        });
        if res.is_err() {
            tracing::warn!(
                comment = %flight.comment.0,
                "rolled back a like for a comment no longer in the tree"
            );
        }
    }

    pub fn is_pending(&self, id: CommentId) -> bool {
        self.in_flight.contains(&id)
    }

    /// Forgets every pending flight. Call this when replacing the tree
    /// wholesale: receipts taken against the old tree must not touch the
    /// new one.
    pub fn reset(&mut self) {
        self.in_flight.clear();
    }
}
