use std::collections::{HashMap, HashSet};

use crate::api::{Comment, CommentId, Sort};

/// One comment with its replies attached, as rendered by a thread view.
///
/// Reply lists are `im::Vector`s so that cloning a forest is cheap and leaves
/// the clone untouched by later mutations of the original: only the path from
/// a root down to an edited node is ever reallocated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: im::Vector<CommentNode>,
}

/// Assembles the forest for one subject out of the flat record list, ordering
/// siblings at every level according to `sort`.
///
/// Runs in one bucketing pass plus one attachment walk, so linear in the
/// number of records modulo the per-level sorts. A record whose parent is not
/// part of the batch becomes a root: the store invariant says this cannot
/// happen, but a half-moderated thread must still render rather than error.
pub fn build_thread(records: Vec<Comment>, sort: Sort) -> im::Vector<CommentNode> {
    let known: HashSet<CommentId> = records.iter().map(|c| c.id).collect();
    let mut children_of: HashMap<Option<CommentId>, Vec<Comment>> = HashMap::new();
    for c in records {
        let parent = c.parent.filter(|p| known.contains(p));
        children_of.entry(parent).or_default().push(c);
    }
    attach(&mut children_of, None, sort)
}

fn attach(
    children_of: &mut HashMap<Option<CommentId>, Vec<Comment>>,
    parent: Option<CommentId>,
    sort: Sort,
) -> im::Vector<CommentNode> {
    let mut level = children_of.remove(&parent).unwrap_or_default();
    sort.sort(&mut level);
    level
        .into_iter()
        .map(|c| {
            let replies = attach(children_of, Some(c.id), sort);
            CommentNode { comment: c, replies }
        })
        .collect()
}

pub fn find(nodes: &im::Vector<CommentNode>, id: CommentId) -> Option<&CommentNode> {
    for n in nodes {
        if n.comment.id == id {
            return Some(n);
        }
        if let Some(res) = find(&n.replies, id) {
            return Some(res);
        }
    }
    None
}

pub(crate) fn find_mut(
    nodes: &mut im::Vector<CommentNode>,
    id: CommentId,
) -> Option<&mut CommentNode> {
    for n in nodes.iter_mut() {
        if n.comment.id == id {
            return Some(n);
        }
        if let Some(res) = find_mut(&mut n.replies, id) {
            return Some(res);
        }
    }
    None
}

/// Number of parent hops from the nearest root; `None` if the comment is not
/// in the forest.
pub fn depth_of(nodes: &im::Vector<CommentNode>, id: CommentId) -> Option<usize> {
    for n in nodes {
        if n.comment.id == id {
            return Some(0);
        }
        if let Some(d) = depth_of(&n.replies, id) {
            return Some(d + 1);
        }
    }
    None
}

/// Pre-order traversal of the forest.
pub fn flatten(nodes: &im::Vector<CommentNode>) -> Vec<&CommentNode> {
    let mut res = Vec::new();
    flatten_into(nodes, &mut res);
    res
}

fn flatten_into<'a>(nodes: &'a im::Vector<CommentNode>, res: &mut Vec<&'a CommentNode>) {
    for n in nodes {
        res.push(n);
        flatten_into(&n.replies, res);
    }
}

pub fn count(nodes: &im::Vector<CommentNode>) -> usize {
    nodes.iter().map(|n| 1 + count(&n.replies)).sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{Author, SubjectId, Time, UserId};
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    pub(crate) fn time(offset: i64) -> Time {
        Utc.timestamp_opt(1_600_000_000, 0).unwrap() + Duration::seconds(offset)
    }

    pub(crate) fn record(id: u128, parent: Option<u128>, likes: u32, at: i64) -> Comment {
        Comment {
            id: CommentId(Uuid::from_u128(id)),
            subject: SubjectId::stub(),
            parent: parent.map(|p| CommentId(Uuid::from_u128(p))),
            author: Author {
                id: UserId::stub(),
                name: String::from("ada"),
                is_viewer: false,
            },
            content: format!("comment {id}"),
            created_at: time(at),
            like_count: likes,
            viewer_liked: false,
            approved: true,
        }
    }

    pub(crate) fn cid(id: u128) -> CommentId {
        CommentId(Uuid::from_u128(id))
    }

    fn root_ids(nodes: &im::Vector<CommentNode>) -> Vec<CommentId> {
        nodes.iter().map(|n| n.comment.id).collect()
    }

    #[test]
    fn empty_input_builds_empty_forest() {
        assert_eq!(build_thread(Vec::new(), Sort::Best), im::Vector::new());
    }

    #[test]
    fn best_puts_earliest_first_among_equally_liked() {
        let records = vec![
            record(1, None, 5, 2),
            record(2, None, 5, 1),
            record(3, None, 2, 3),
        ];
        let forest = build_thread(records, Sort::Best);
        assert_eq!(root_ids(&forest), vec![cid(2), cid(1), cid(3)]);
    }

    #[test]
    fn newest_and_oldest_are_time_ordered() {
        let records = vec![record(1, None, 0, 1), record(2, None, 3, 2)];
        let newest = build_thread(records.clone(), Sort::Newest);
        assert_eq!(root_ids(&newest), vec![cid(2), cid(1)]);
        let best = build_thread(records.clone(), Sort::Best);
        assert_eq!(root_ids(&best), vec![cid(2), cid(1)]);
        let oldest = build_thread(records, Sort::Oldest);
        assert_eq!(root_ids(&oldest), vec![cid(1), cid(2)]);
    }

    #[test]
    fn sorting_applies_at_every_level_independently() {
        let records = vec![
            record(1, None, 0, 1),
            record(2, None, 9, 2),
            record(11, Some(1), 1, 5),
            record(12, Some(1), 7, 4),
            record(13, Some(1), 7, 3),
        ];
        let forest = build_thread(records, Sort::Best);
        assert_eq!(root_ids(&forest), vec![cid(2), cid(1)]);
        let replies: Vec<_> = forest[1].replies.iter().map(|n| n.comment.id).collect();
        assert_eq!(replies, vec![cid(13), cid(12), cid(11)]);
    }

    #[test]
    fn unresolved_parent_demotes_to_root() {
        let records = vec![record(1, None, 0, 1), record(2, Some(99), 0, 2)];
        let forest = build_thread(records, Sort::Oldest);
        assert_eq!(root_ids(&forest), vec![cid(1), cid(2)]);
        assert_eq!(count(&forest), 2);
    }

    #[test]
    fn find_and_depth_reach_nested_nodes() {
        let records = vec![
            record(1, None, 0, 1),
            record(2, Some(1), 0, 2),
            record(3, Some(2), 0, 3),
        ];
        let forest = build_thread(records, Sort::Oldest);
        assert_eq!(find(&forest, cid(3)).unwrap().comment.content, "comment 3");
        assert_eq!(depth_of(&forest, cid(1)), Some(0));
        assert_eq!(depth_of(&forest, cid(2)), Some(1));
        assert_eq!(depth_of(&forest, cid(3)), Some(2));
        assert!(find(&forest, cid(99)).is_none());
        assert_eq!(depth_of(&forest, cid(99)), None);
    }

    /// The raw material of the round-trip property: each entry picks its
    /// parent among the records generated before it, so the structure is
    /// acyclic by construction.
    #[derive(Clone, Debug, bolero::generator::TypeGenerator)]
    struct RawRecord {
        parent: Option<u8>,
        likes: u8,
        at: i8,
    }

    fn realize(raws: Vec<RawRecord>) -> Vec<Comment> {
        raws.iter()
            .enumerate()
            .map(|(i, raw)| {
                let parent = match (i, raw.parent) {
                    (0, _) | (_, None) => None,
                    (_, Some(p)) => Some(p as u128 % i as u128),
                };
                record(i as u128, parent, raw.likes as u32, raw.at as i64)
            })
            .collect()
    }

    #[test]
    fn flatten_round_trips_ids_for_every_sort() {
        bolero::check!()
            .with_generator(bolero::generator::gen_with::<Vec<RawRecord>>().len(0..32usize))
            .cloned()
            .for_each(|raws| {
                let records = realize(raws);
                let mut want: Vec<CommentId> = records.iter().map(|c| c.id).collect();
                want.sort();
                for sort in [Sort::Best, Sort::Newest, Sort::Oldest] {
                    let forest = build_thread(records.clone(), sort);
                    let mut got: Vec<CommentId> =
                        flatten(&forest).iter().map(|n| n.comment.id).collect();
                    got.sort();
                    assert_eq!(got, want, "ids lost or duplicated under {sort:?}");
                    assert_eq!(count(&forest), records.len());
                }
            })
    }

    #[test]
    fn children_always_follow_their_parent_in_preorder() {
        bolero::check!()
            .with_generator(bolero::generator::gen_with::<Vec<RawRecord>>().len(0..32usize))
            .cloned()
            .for_each(|raws| {
                let records = realize(raws);
                let forest = build_thread(records, Sort::Best);
                let flat = flatten(&forest);
                for (i, node) in flat.iter().enumerate() {
                    if let Some(parent) = node.comment.parent {
                        let parent_pos = flat
                            .iter()
                            .position(|n| n.comment.id == parent)
                            .expect("parent missing from flattened forest");
                        assert!(parent_pos < i, "parent listed after its child");
                    }
                }
            })
    }
}
