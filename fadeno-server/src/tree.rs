use std::collections::{HashMap, HashSet};

use anyhow::Context;
use fadeno_api::{Comment, CommentId, CommentNode, ThreadId, Uuid};
use sqlx::PgConnection;

use crate::db;

/// A thread node as read from the closure table: the comment carried by a
/// self-edge plus its direct parent and depth.
#[derive(Clone, Debug)]
pub struct NodeRow {
    pub comment: Comment,
    pub nearest_ancestor_id: Option<CommentId>,
    pub level: i32,
}

/// Takes the per-thread advisory lock for the rest of the current
/// transaction. Concurrent replies into one thread would otherwise read a
/// stale ancestor set in [`insert_branch`]; read-committed isolation alone
/// does not prevent that.
pub async fn lock_thread(conn: &mut PgConnection, thread: ThreadId) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(thread.0.as_u128() as i64)
        .execute(conn)
        .await
        .with_context(|| format!("taking advisory lock for thread {:?}", thread))?;
    Ok(())
}

/// Inserts the closure-table branch for a new comment: one derived edge
/// per ancestor of the parent, plus the new comment's self-edge. With no
/// parent only the level-0 self-edge is inserted (the ancestor SELECT
/// matches nothing against a NULL parent).
///
/// Must run inside the same transaction as the comment row creation, with
/// [`lock_thread`] already taken.
pub async fn insert_branch(
    conn: &mut PgConnection,
    parent_id: Option<CommentId>,
    new_comment: CommentId,
    thread: ThreadId,
    parent_level: i32,
) -> anyhow::Result<()> {
    sqlx::query(
        "
            INSERT INTO comment_tree (ancestor_id, descendant_id, nearest_ancestor_id, thread_id, level)
            SELECT ancestor_id, $1::uuid, $2::uuid, $3::uuid, $4::int4
                FROM comment_tree
            WHERE descendant_id = $2::uuid
            UNION ALL SELECT $1::uuid, $1::uuid, $2::uuid, $3::uuid, $4::int4
        ",
    )
    .bind(new_comment.0)
    .bind(parent_id.map(|p| p.0))
    .bind(thread.0)
    .bind(parent_level + 1)
    .execute(conn)
    .await
    .with_context(|| format!("inserting branch for comment {:?}", new_comment))?;
    Ok(())
}

/// Flat read of a whole thread: every self-edge joined to its comment,
/// ascending by comment id. This is the only query thread reconstruction
/// needs; the closure table trades insert work for it.
pub async fn thread_nodes(
    conn: &mut PgConnection,
    thread: ThreadId,
) -> anyhow::Result<Vec<NodeRow>> {
    let rows = sqlx::query(
        "
            SELECT c.id, c.content, c.state, c.owner_id, c.created_at, c.updated_at,
                   t.nearest_ancestor_id, t.level
                FROM comments c
            INNER JOIN comment_tree t
                ON t.descendant_id = c.id
                AND t.ancestor_id = c.id
            WHERE t.thread_id = $1
            ORDER BY c.id ASC
        ",
    )
    .bind(thread.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("querying self-edges of thread {:?}", thread))?;

    rows.iter()
        .map(|row| {
            use sqlx::Row;
            Ok(NodeRow {
                comment: db::comment_from_row(row)?,
                nearest_ancestor_id: row
                    .try_get::<Option<Uuid>, _>("nearest_ancestor_id")
                    .context("retrieving the nearest_ancestor_id field")?
                    .map(CommentId),
                level: row.try_get("level").context("retrieving the level field")?,
            })
        })
        .collect()
}

/// Assembles the forest out of self-edge rows. Rows must arrive ordered
/// ascending by comment id; that order is preserved among roots and among
/// the answers of each node. A node whose recorded parent is not part of
/// the thread is dropped.
pub fn build_forest(rows: Vec<NodeRow>) -> Vec<CommentNode> {
    let ids: HashSet<CommentId> = rows.iter().map(|r| r.comment.id).collect();

    let mut roots = Vec::new();
    let mut answers: HashMap<CommentId, Vec<NodeRow>> = HashMap::new();
    for row in rows {
        match row.nearest_ancestor_id {
            None => roots.push(row),
            Some(parent) if ids.contains(&parent) => {
                answers.entry(parent).or_default().push(row)
            }
            Some(_) => (),
        }
    }

    // explicit worklist instead of recursion; reply chains can be deeper
    // than the call stack
    struct Frame {
        row: NodeRow,
        pending: std::vec::IntoIter<NodeRow>,
        built: Vec<CommentNode>,
    }

    fn frame(row: NodeRow, answers: &mut HashMap<CommentId, Vec<NodeRow>>) -> Frame {
        let pending = answers
            .remove(&row.comment.id)
            .unwrap_or_default()
            .into_iter();
        Frame {
            row,
            pending,
            built: Vec::new(),
        }
    }

    fn attach(root: NodeRow, answers: &mut HashMap<CommentId, Vec<NodeRow>>) -> CommentNode {
        let mut stack = vec![frame(root, answers)];
        loop {
            let next = stack.last_mut().expect("empty attach stack").pending.next();
            match next {
                Some(child) => {
                    let f = frame(child, answers);
                    stack.push(f);
                }
                None => {
                    let done = stack.pop().expect("empty attach stack");
                    let node = CommentNode {
                        parent_id: done.row.nearest_ancestor_id,
                        level: done.row.level,
                        answers: done.built,
                        comment: done.row.comment,
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.built.push(node),
                        None => return node,
                    }
                }
            }
        }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut answers))
        .collect()
}

/// Physically removes a whole thread's comments and edges. Single-comment
/// deletion is a soft state change elsewhere; this is the only path that
/// drops Comment rows.
pub async fn delete_thread_edges(conn: &mut PgConnection, thread: ThreadId) -> anyhow::Result<()> {
    sqlx::query(
        "
            DELETE FROM comments
            WHERE id IN (
                SELECT descendant_id FROM comment_tree
                WHERE ancestor_id = descendant_id
                AND thread_id = $1
            )
        ",
    )
    .bind(thread.0)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("deleting comments of thread {:?}", thread))?;

    sqlx::query("DELETE FROM comment_tree WHERE thread_id = $1")
        .bind(thread.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting edges of thread {:?}", thread))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fadeno_api::{CommentState, UserId, Uuid};

    /// In-memory model of the closure table, mirroring the SQL of
    /// [`insert_branch`] and [`delete_thread_edges`] row for row.
    #[derive(Default)]
    struct MemTree {
        edges: Vec<Edge>,
        comments: Vec<(CommentId, UserId)>,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Edge {
        ancestor_id: CommentId,
        descendant_id: CommentId,
        nearest_ancestor_id: Option<CommentId>,
        thread_id: ThreadId,
        level: i32,
    }

    impl MemTree {
        fn insert_branch(
            &mut self,
            parent_id: Option<CommentId>,
            new_comment: CommentId,
            thread: ThreadId,
            parent_level: i32,
        ) {
            if let Some(parent) = parent_id {
                let derived: Vec<Edge> = self
                    .edges
                    .iter()
                    .filter(|e| e.descendant_id == parent)
                    .map(|e| Edge {
                        ancestor_id: e.ancestor_id,
                        descendant_id: new_comment,
                        nearest_ancestor_id: Some(parent),
                        thread_id: thread,
                        level: parent_level + 1,
                    })
                    .collect();
                self.edges.extend(derived);
            }
            self.edges.push(Edge {
                ancestor_id: new_comment,
                descendant_id: new_comment,
                nearest_ancestor_id: parent_id,
                thread_id: thread,
                level: parent_level + 1,
            });
        }

        fn add(&mut self, owner: UserId, thread: ThreadId, parent: Option<CommentId>) -> CommentId {
            let id = CommentId(Uuid::new_v4());
            let parent_level = parent.map_or(-1, |p| self.self_edge(p).level);
            self.comments.push((id, owner));
            self.insert_branch(parent, id, thread, parent_level);
            id
        }

        fn self_edge(&self, id: CommentId) -> &Edge {
            self.edges
                .iter()
                .find(|e| e.ancestor_id == id && e.descendant_id == id)
                .expect("missing self-edge")
        }

        fn delete_thread(&mut self, thread: ThreadId) {
            let victims: HashSet<CommentId> = self
                .edges
                .iter()
                .filter(|e| e.thread_id == thread && e.ancestor_id == e.descendant_id)
                .map(|e| e.descendant_id)
                .collect();
            self.comments.retain(|(id, _)| !victims.contains(id));
            self.edges.retain(|e| e.thread_id != thread);
        }

        fn nodes(&self, thread: ThreadId) -> Vec<NodeRow> {
            let mut rows: Vec<NodeRow> = self
                .edges
                .iter()
                .filter(|e| e.thread_id == thread && e.ancestor_id == e.descendant_id)
                .map(|e| {
                    let (_, owner) = self
                        .comments
                        .iter()
                        .find(|(id, _)| *id == e.descendant_id)
                        .expect("self-edge without comment");
                    NodeRow {
                        comment: comment(e.descendant_id, *owner),
                        nearest_ancestor_id: e.nearest_ancestor_id,
                        level: e.level,
                    }
                })
                .collect();
            rows.sort_by_key(|r| r.comment.id);
            rows
        }
    }

    fn comment(id: CommentId, owner: UserId) -> Comment {
        Comment {
            id,
            content: String::from("hello"),
            state: CommentState::Published,
            owner_id: owner,
            created_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            updated_at: None,
        }
    }

    fn node(id: CommentId, parent: Option<CommentId>, level: i32) -> NodeRow {
        NodeRow {
            comment: comment(id, UserId::stub()),
            nearest_ancestor_id: parent,
            level,
        }
    }

    fn ids(n: usize) -> Vec<CommentId> {
        let mut v: Vec<CommentId> = (0..n).map(|_| CommentId(Uuid::new_v4())).collect();
        v.sort();
        v
    }

    #[test]
    fn root_insert_creates_single_self_edge() {
        let mut tree = MemTree::default();
        let thread = ThreadId::stub();
        let root = tree.add(UserId::stub(), thread, None);
        assert_eq!(tree.edges.len(), 1);
        let e = tree.self_edge(root);
        assert_eq!(e.level, 0);
        assert_eq!(e.nearest_ancestor_id, None);
    }

    #[test]
    fn reply_levels_and_ancestor_counts() {
        let mut tree = MemTree::default();
        let thread = ThreadId::stub();
        let owner = UserId::stub();
        let root = tree.add(owner, thread, None);
        let child = tree.add(owner, thread, Some(root));
        let grandchild = tree.add(owner, thread, Some(child));

        assert_eq!(tree.self_edge(child).level, 1);
        assert_eq!(tree.self_edge(child).nearest_ancestor_id, Some(root));
        assert_eq!(tree.self_edge(grandchild).level, 2);
        assert_eq!(tree.self_edge(grandchild).nearest_ancestor_id, Some(child));

        // a node at depth d is a descendant in d+1 edges (one per ancestor
        // incl. itself)
        for (id, depth) in [(root, 0), (child, 1), (grandchild, 2)] {
            let count = tree.edges.iter().filter(|e| e.descendant_id == id).count();
            assert_eq!(count, depth + 1);
        }

        // exactly one edge per reachable (ancestor, descendant) pair
        let pairs: HashSet<(CommentId, CommentId)> = tree
            .edges
            .iter()
            .map(|e| (e.ancestor_id, e.descendant_id))
            .collect();
        assert_eq!(pairs.len(), tree.edges.len());
        assert!(pairs.contains(&(root, grandchild)));
    }

    #[test]
    fn forest_contains_every_comment_once() {
        let mut tree = MemTree::default();
        let thread = ThreadId::stub();
        let owner = UserId::stub();
        let root_a = tree.add(owner, thread, None);
        let root_b = tree.add(owner, thread, None);
        let child = tree.add(owner, thread, Some(root_a));
        let grandchild = tree.add(owner, thread, Some(child));

        let forest = build_forest(tree.nodes(thread));

        fn collect(nodes: &[CommentNode], into: &mut Vec<CommentId>) {
            for n in nodes {
                into.push(n.comment.id);
                collect(&n.answers, into);
            }
        }
        let mut seen = Vec::new();
        collect(&forest, &mut seen);
        seen.sort();
        let mut expected = vec![root_a, root_b, child, grandchild];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn reconstruction_is_pure() {
        let mut tree = MemTree::default();
        let thread = ThreadId::stub();
        let root = tree.add(UserId::stub(), thread, None);
        tree.add(UserId::stub(), thread, Some(root));

        let a = build_forest(tree.nodes(thread));
        let b = build_forest(tree.nodes(thread));
        assert_eq!(a, b);
    }

    #[test]
    fn roots_and_answers_ascend_by_id() {
        let id = ids(5);
        let rows = vec![
            node(id[0], None, 0),
            node(id[1], Some(id[0]), 1),
            node(id[2], Some(id[0]), 1),
            node(id[3], None, 0),
            node(id[4], Some(id[0]), 1),
        ];
        let forest = build_forest(rows);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].comment.id, id[0]);
        assert_eq!(forest[1].comment.id, id[3]);
        let answers: Vec<CommentId> = forest[0].answers.iter().map(|n| n.comment.id).collect();
        assert_eq!(answers, vec![id[1], id[2], id[4]]);
    }

    #[test]
    fn reply_with_smaller_id_than_parent_still_attaches() {
        let id = ids(2);
        // rows arrive in ascending id order even when the child sorts
        // before its parent
        let rows = vec![node(id[0], Some(id[1]), 1), node(id[1], None, 0)];
        let forest = build_forest(rows);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment.id, id[1]);
        assert_eq!(forest[0].answers[0].comment.id, id[0]);
    }

    #[test]
    fn orphan_nodes_are_dropped() {
        let id = ids(2);
        let rows = vec![
            node(id[0], None, 0),
            node(id[1], Some(CommentId(Uuid::new_v4())), 1),
        ];
        let forest = build_forest(rows);
        assert_eq!(forest.len(), 1);
        assert!(forest[0].answers.is_empty());
    }

    #[test]
    fn deep_reply_chain_does_not_overflow() {
        const DEPTH: usize = 50_000;
        let id = ids(DEPTH);
        let mut rows = vec![node(id[0], None, 0)];
        for i in 1..DEPTH {
            rows.push(node(id[i], Some(id[i - 1]), i as i32));
        }

        let mut forest = build_forest(rows);
        assert_eq!(forest.len(), 1);

        // walk (and dismantle) the chain iteratively so the check itself
        // stays flat too
        let mut depth = 0;
        let mut current = forest.pop().expect("one root");
        loop {
            depth += 1;
            assert_eq!(current.level, depth as i32 - 1);
            match current.answers.pop() {
                Some(child) => current = child,
                None => break,
            }
        }
        assert_eq!(depth, DEPTH);
    }

    #[test]
    fn delete_thread_purges_everything() {
        let mut tree = MemTree::default();
        let thread = ThreadId(Uuid::new_v4());
        let other = ThreadId(Uuid::new_v4());
        let root = tree.add(UserId::stub(), thread, None);
        tree.add(UserId::stub(), thread, Some(root));
        let kept = tree.add(UserId::stub(), other, None);

        tree.delete_thread(thread);

        assert!(build_forest(tree.nodes(thread)).is_empty());
        assert!(tree.edges.iter().all(|e| e.thread_id != thread));
        // the other thread is untouched
        assert_eq!(tree.nodes(other).len(), 1);
        assert!(tree.comments.iter().any(|(id, _)| *id == kept));
        assert_eq!(tree.comments.len(), 1);
    }

    #[test]
    fn scenario_hello_then_reply() {
        let mut tree = MemTree::default();
        let thread = ThreadId::stub();
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());

        let hello = tree.add(alice, thread, None);
        let forest = build_forest(tree.nodes(thread));
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].level, 0);
        assert!(forest[0].answers.is_empty());

        let reply = tree.add(bob, thread, Some(hello));
        let forest = build_forest(tree.nodes(thread));
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment.id, hello);
        assert_eq!(forest[0].answers.len(), 1);
        let answer = &forest[0].answers[0];
        assert_eq!(answer.comment.id, reply);
        assert_eq!(answer.level, 1);
        assert_eq!(answer.parent_id, Some(hello));
    }
}
