// Thread assembler - turns a post's flat comment rows into nested reply trees

use std::collections::HashMap;

use crate::entities::Comment;

/// Nest `rows` (in fetch order) under their parents.
///
/// Roots keep fetch order, and so does every `replies` list. A comment whose
/// parent is missing from `rows`, or that names itself as parent, becomes a
/// root instead of being dropped. Comments left unreachable because their
/// ancestry loops back on itself are promoted to roots as well, so every row
/// appears exactly once and never as its own ancestor. Depth is unbounded and
/// the walk is iterative.
pub fn assemble_thread(rows: Vec<Comment>) -> Vec<Comment> {
    let n = rows.len();

    let mut position: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, comment) in rows.iter().enumerate() {
        position.entry(comment.id.as_str()).or_insert(i);
    }

    let parent: Vec<Option<usize>> = rows
        .iter()
        .enumerate()
        .map(|(i, comment)| {
            comment
                .parent_id
                .as_deref()
                .and_then(|p| position.get(p).copied())
                .filter(|&p| p != i)
        })
        .collect();
    drop(position);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = *p {
            children[p].push(i);
        }
    }

    let mut is_root: Vec<bool> = parent.iter().map(Option::is_none).collect();
    let mut reached = vec![false; n];
    let mut preorder = Vec::with_capacity(n);

    let walk = |start: usize, is_root: &[bool], reached: &mut [bool], preorder: &mut Vec<usize>| {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if reached[node] {
                continue;
            }
            reached[node] = true;
            preorder.push(node);
            for &child in children[node].iter().rev() {
                if !reached[child] && !is_root[child] {
                    stack.push(child);
                }
            }
        }
    };

    for i in 0..n {
        if is_root[i] {
            walk(i, &is_root, &mut reached, &mut preorder);
        }
    }
    for i in 0..n {
        if !reached[i] {
            is_root[i] = true;
            walk(i, &is_root, &mut reached, &mut preorder);
        }
    }

    // Children come after their parent in preorder, so a reverse pass
    // finishes every subtree before it is attached
    let mut built: Vec<Option<Comment>> = rows.into_iter().map(Some).collect();
    for &node in preorder.iter().rev() {
        let replies: Vec<Comment> = children[node]
            .iter()
            .filter(|&&child| !is_root[child])
            .filter_map(|&child| built[child].take())
            .collect();
        if let Some(comment) = built[node].as_mut() {
            comment.replies = replies;
        }
    }

    (0..n)
        .filter(|&i| is_root[i])
        .filter_map(|i| built[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Author;
    use chrono::{TimeZone, Utc};

    fn comment(id: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: id.to_string(),
            post_id: "p1".to_string(),
            author: Author::unknown("u1"),
            content: format!("comment {}", id),
            parent_id: parent.map(str::to_string),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            replies: Vec::new(),
        }
    }

    fn shape(thread: &[Comment]) -> Vec<String> {
        thread
            .iter()
            .map(|c| {
                if c.replies.is_empty() {
                    c.id.clone()
                } else {
                    format!("{}[{}]", c.id, shape(&c.replies).join(","))
                }
            })
            .collect()
    }

    #[test]
    fn test_nests_replies_in_fetch_order() {
        let rows = vec![
            comment("a", None),
            comment("b", Some("a")),
            comment("c", None),
            comment("d", Some("b")),
            comment("e", Some("a")),
        ];
        assert_eq!(shape(&assemble_thread(rows)), vec!["a[b[d],e]", "c"]);
    }

    #[test]
    fn test_reply_fetched_before_parent() {
        let rows = vec![comment("child", Some("root")), comment("root", None)];
        assert_eq!(shape(&assemble_thread(rows)), vec!["root[child]"]);
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let rows = vec![comment("a", None), comment("orphan", Some("deleted")), comment("b", Some("orphan"))];
        assert_eq!(shape(&assemble_thread(rows)), vec!["a", "orphan[b]"]);
    }

    #[test]
    fn test_self_parent_becomes_root() {
        let rows = vec![comment("loop", Some("loop"))];
        assert_eq!(shape(&assemble_thread(rows)), vec!["loop"]);
    }

    #[test]
    fn test_cycle_is_broken_not_dropped() {
        let rows = vec![comment("x", Some("y")), comment("y", Some("x")), comment("z", Some("y"))];
        assert_eq!(shape(&assemble_thread(rows)), vec!["x[y[z]]"]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut rows = vec![comment("0", None)];
        for i in 1..20_000 {
            rows.push(comment(&i.to_string(), Some(&(i - 1).to_string())));
        }
        let thread = assemble_thread(rows);
        assert_eq!(thread.len(), 1);

        let mut depth = 0;
        let mut node = &thread[0];
        while let Some(next) = node.replies.first() {
            depth += 1;
            node = next;
        }
        assert_eq!(depth, 19_999);

        // Tear down iteratively so the recursive drop of nested Vecs stays shallow
        let mut pending = thread;
        while let Some(mut c) = pending.pop() {
            pending.append(&mut c.replies);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(assemble_thread(Vec::new()).is_empty());
    }
}
