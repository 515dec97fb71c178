//! Text operational-transform engine.
//!
//! Operations apply to a single linear document; positions are 0-based
//! code-unit offsets into the document as it exists *before* the
//! operation is applied.  Documents are BMP-only text (the blob store's
//! eligibility check guarantees this for editable content), so code-unit
//! offsets coincide with character offsets.
//!
//! The engine guarantees convergence: for any two operations A and B
//! applicable to the same document,
//! `apply(apply(doc, A), transform(B, A, Right))` equals
//! `apply(apply(doc, B), transform(A, B, Left))`.

use thiserror::Error;

/// A single text operation.
///
/// Delete and comment operations carry the text they expect to find so
/// that [`apply`] can verify it, defending against stale or misrouted
/// operation streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOp {
    /// Splice `content` in at `position`.
    Insert { position: usize, content: String },
    /// Remove `content` starting at `position`.
    Delete { position: usize, content: String },
    /// Annotate `content` at `position` with comment thread `thread`.
    /// Does not mutate the document.
    Comment {
        position: usize,
        content: String,
        thread: String,
    },
}

/// Tie-break side for transforming concurrent operations at the same
/// position: the `Left` operation is treated as happening first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Errors raised by apply and transform.
#[derive(Debug, Error)]
pub enum OtError {
    /// The text the operation expected is not what the document holds —
    /// the operation stream is out of sync and the caller must
    /// resynchronize rather than retry.
    #[error("{kind} content '{expected}' does not match document text '{found}' at position {position}")]
    ContentMismatch {
        kind: &'static str,
        position: usize,
        expected: String,
        found: String,
    },

    /// The operation reaches past the end of the document.
    #[error("position {position} is out of bounds for a document of length {length}")]
    OutOfBounds { position: usize, length: usize },

    /// Two concurrent deletes claim different text in the same region.
    #[error("delete operations remove different text in the same region of the document")]
    DeleteMismatch,

    /// Comment operations have no inverse.
    #[error("comment operations cannot be inverted")]
    NotInvertible,
}

impl TextOp {
    pub fn position(&self) -> usize {
        match self {
            TextOp::Insert { position, .. }
            | TextOp::Delete { position, .. }
            | TextOp::Comment { position, .. } => *position,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            TextOp::Insert { content, .. }
            | TextOp::Delete { content, .. }
            | TextOp::Comment { content, .. } => content,
        }
    }

    /// Same kind and content, different position.
    fn with_position(&self, position: usize) -> TextOp {
        self.with_parts(position, self.content().to_string())
    }

    /// Same kind and position, different content.
    fn with_content(&self, content: String) -> TextOp {
        self.with_parts(self.position(), content)
    }

    fn with_parts(&self, position: usize, content: String) -> TextOp {
        match self {
            TextOp::Insert { .. } => TextOp::Insert { position, content },
            TextOp::Delete { .. } => TextOp::Delete { position, content },
            TextOp::Comment { thread, .. } => TextOp::Comment {
                position,
                content,
                thread: thread.clone(),
            },
        }
    }
}

// ── Character-offset helpers ────────────────────────────────────────

pub(crate) fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn byte_offset(s: &str, char_pos: usize) -> Option<usize> {
    if char_pos == 0 {
        return Some(0);
    }
    let mut seen = 0usize;
    for (i, _) in s.char_indices() {
        if seen == char_pos {
            return Some(i);
        }
        seen += 1;
    }
    // char_pos may point one past the last character.
    if seen == char_pos {
        Some(s.len())
    } else {
        None
    }
}

pub(crate) fn slice_chars(s: &str, start: usize, end: usize) -> Option<&str> {
    let b0 = byte_offset(s, start)?;
    let b1 = byte_offset(s, end)?;
    s.get(b0..b1)
}

pub(crate) fn inject(s: &str, char_pos: usize, insertion: &str) -> Option<String> {
    let b = byte_offset(s, char_pos)?;
    let mut out = String::with_capacity(s.len() + insertion.len());
    out.push_str(&s[..b]);
    out.push_str(insertion);
    out.push_str(&s[b..]);
    Some(out)
}

// ── Apply ───────────────────────────────────────────────────────────

/// Apply a sequence of operations to a document, each against the state
/// produced by the previous one.
pub fn apply(document: &str, ops: &[TextOp]) -> Result<String, OtError> {
    let mut doc = document.to_string();
    for op in ops {
        doc = apply_component(&doc, op)?;
    }
    Ok(doc)
}

fn apply_component(doc: &str, op: &TextOp) -> Result<String, OtError> {
    let doc_len = char_count(doc);
    match op {
        TextOp::Insert { position, content } => {
            inject(doc, *position, content).ok_or(OtError::OutOfBounds {
                position: *position,
                length: doc_len,
            })
        }
        TextOp::Delete { position, content } => {
            let end = position + char_count(content);
            let found = slice_chars(doc, *position, end).ok_or(OtError::OutOfBounds {
                position: *position,
                length: doc_len,
            })?;
            if found != content {
                return Err(OtError::ContentMismatch {
                    kind: "delete",
                    position: *position,
                    expected: content.clone(),
                    found: found.to_string(),
                });
            }
            let head = slice_chars(doc, 0, *position).unwrap_or_default();
            let tail = slice_chars(doc, end, doc_len).unwrap_or_default();
            Ok(format!("{head}{tail}"))
        }
        TextOp::Comment {
            position, content, ..
        } => {
            let end = position + char_count(content);
            let found = slice_chars(doc, *position, end).ok_or(OtError::OutOfBounds {
                position: *position,
                length: doc_len,
            })?;
            if found != content {
                return Err(OtError::ContentMismatch {
                    kind: "comment",
                    position: *position,
                    expected: content.clone(),
                    found: found.to_string(),
                });
            }
            Ok(doc.to_string())
        }
    }
}

// ── Component append / compose ──────────────────────────────────────

/// Append a component to an operation list, merging it into the previous
/// component when the two are adjacent edits of the same kind.  Empty
/// inserts and deletes are dropped; empty comments are kept (a comment
/// shrunk to nothing still marks a range).
pub fn append(ops: &mut Vec<TextOp>, c: TextOp) {
    match &c {
        TextOp::Insert { content, .. } | TextOp::Delete { content, .. } if content.is_empty() => {
            return;
        }
        _ => {}
    }

    let merged = match (ops.last(), &c) {
        (
            Some(TextOp::Insert {
                position: last_pos,
                content: last_content,
            }),
            TextOp::Insert { position, content },
        ) if *last_pos <= *position && *position <= *last_pos + char_count(last_content) => {
            inject(last_content, position - last_pos, content).map(|content| TextOp::Insert {
                position: *last_pos,
                content,
            })
        }
        (
            Some(TextOp::Delete {
                position: last_pos,
                content: last_content,
            }),
            TextOp::Delete { position, content },
        ) if *position <= *last_pos && *last_pos <= *position + char_count(content) => {
            inject(content, last_pos - position, last_content).map(|content| TextOp::Delete {
                position: *position,
                content,
            })
        }
        _ => None,
    };

    match merged {
        Some(op) => {
            ops.pop();
            ops.push(op);
        }
        None => ops.push(c),
    }
}

/// Compose two sequential operation lists into one, merging adjacent
/// compatible components.  An optimization for maintenance tooling; the
/// correctness contract lives in [`transform`]/[`apply`].
pub fn compose(op1: &[TextOp], op2: &[TextOp]) -> Vec<TextOp> {
    let mut out = op1.to_vec();
    for c in op2 {
        append(&mut out, c.clone());
    }
    out
}

/// Compress an operation list as much as merging allows.
pub fn compress(op: &[TextOp]) -> Vec<TextOp> {
    compose(&[], op)
}

/// Invert a content operation list (inserts become deletes and vice
/// versa, in reverse order).  Comments carry no inverse.
pub fn invert(op: &[TextOp]) -> Result<Vec<TextOp>, OtError> {
    let mut out = Vec::with_capacity(op.len());
    for c in op.iter().rev() {
        match c {
            TextOp::Insert { position, content } => out.push(TextOp::Delete {
                position: *position,
                content: content.clone(),
            }),
            TextOp::Delete { position, content } => out.push(TextOp::Insert {
                position: *position,
                content: content.clone(),
            }),
            TextOp::Comment { .. } => return Err(OtError::NotInvertible),
        }
    }
    Ok(out)
}

// ── Transform ───────────────────────────────────────────────────────

/// Transform a position past a single already-applied component.
///
/// If `c` is an insert at exactly `pos`, `insert_after` decides whether
/// the position is pushed past the insertion.
fn transform_position(pos: usize, c: &TextOp, insert_after: bool) -> usize {
    match c {
        TextOp::Insert { position, content } => {
            if *position < pos || (*position == pos && insert_after) {
                pos + char_count(content)
            } else {
                pos
            }
        }
        TextOp::Delete { position, content } => {
            let len = char_count(content);
            if pos <= *position {
                pos
            } else if pos <= *position + len {
                *position
            } else {
                pos - len
            }
        }
        TextOp::Comment { .. } => pos,
    }
}

/// Transform a cursor position past an already-applied operation list.
/// `Side::Right` pushes the cursor after an insert landing exactly on it.
pub fn transform_cursor(position: usize, op: &[TextOp], side: Side) -> usize {
    let insert_after = side == Side::Right;
    op.iter()
        .fold(position, |pos, c| transform_position(pos, c, insert_after))
}

/// Transform component `c` so it applies after `other_c`, appending zero
/// or more resulting components to `dest`.  `side` breaks ties when both
/// reference the same position: the `Left` operation is treated as
/// happening first.
pub fn transform_component(
    dest: &mut Vec<TextOp>,
    c: &TextOp,
    other_c: &TextOp,
    side: Side,
) -> Result<(), OtError> {
    match c {
        TextOp::Insert { position, .. } => {
            append(
                dest,
                c.with_position(transform_position(*position, other_c, side == Side::Right)),
            );
        }

        TextOp::Delete { position, content } => match other_c {
            TextOp::Insert {
                position: other_pos,
                content: other_content,
            } => {
                // An insert strictly inside the delete range splits the
                // delete in two, preserving exact content matching.
                let c_pos = *position;
                let mut remaining = content.clone();
                if c_pos < *other_pos {
                    let cut = (*other_pos - c_pos).min(char_count(&remaining));
                    let head = slice_chars(&remaining, 0, cut)
                        .expect("cut within bounds")
                        .to_string();
                    append(
                        dest,
                        TextOp::Delete {
                            position: c_pos,
                            content: head,
                        },
                    );
                    remaining = slice_chars(&remaining, cut, char_count(&remaining))
                        .expect("cut within bounds")
                        .to_string();
                }
                if !remaining.is_empty() {
                    append(
                        dest,
                        TextOp::Delete {
                            position: c_pos + char_count(other_content),
                            content: remaining,
                        },
                    );
                }
            }
            TextOp::Delete {
                position: other_pos,
                content: other_content,
            } => {
                let c_pos = *position;
                let c_len = char_count(content);
                let o_pos = *other_pos;
                let o_len = char_count(other_content);
                if c_pos >= o_pos + o_len {
                    append(dest, c.with_position(c_pos - o_len));
                } else if c_pos + c_len <= o_pos {
                    append(dest, c.clone());
                } else {
                    // Overlap: keep the set-difference of c's range minus
                    // other's range.
                    let mut new_content = String::new();
                    if c_pos < o_pos {
                        new_content.push_str(
                            slice_chars(content, 0, o_pos - c_pos).expect("prefix within bounds"),
                        );
                    }
                    if c_pos + c_len > o_pos + o_len {
                        new_content.push_str(
                            slice_chars(content, o_pos + o_len - c_pos, c_len)
                                .expect("suffix within bounds"),
                        );
                    }

                    check_intersection(content, c_pos, other_content, o_pos)?;

                    if !new_content.is_empty() {
                        let new_pos = transform_position(c_pos, other_c, false);
                        append(
                            dest,
                            TextOp::Delete {
                                position: new_pos,
                                content: new_content,
                            },
                        );
                    }
                }
            }
            TextOp::Comment { .. } => append(dest, c.clone()),
        },

        TextOp::Comment {
            position, content, ..
        } => match other_c {
            TextOp::Insert {
                position: other_pos,
                content: other_content,
            } => {
                let c_pos = *position;
                let c_len = char_count(content);
                if c_pos < *other_pos && *other_pos < c_pos + c_len {
                    // Strictly interior: the comment absorbs the
                    // inserted text.  Inserts at either edge do not
                    // extend the comment.
                    let offset = *other_pos - c_pos;
                    let extended =
                        inject(content, offset, other_content).expect("offset within bounds");
                    append(dest, c.with_content(extended));
                } else {
                    append(
                        dest,
                        c.with_position(transform_position(c_pos, other_c, true)),
                    );
                }
            }
            TextOp::Delete {
                position: other_pos,
                content: other_content,
            } => {
                let c_pos = *position;
                let c_len = char_count(content);
                let o_pos = *other_pos;
                let o_len = char_count(other_content);
                if c_pos >= o_pos + o_len {
                    append(dest, c.with_position(c_pos - o_len));
                } else if c_pos + c_len <= o_pos {
                    append(dest, c.clone());
                } else {
                    // The delete overlaps the comment: shrink the
                    // comment's span by the overlapping portion.
                    let mut new_content = String::new();
                    if c_pos < o_pos {
                        new_content.push_str(
                            slice_chars(content, 0, o_pos - c_pos).expect("prefix within bounds"),
                        );
                    }
                    if c_pos + c_len > o_pos + o_len {
                        new_content.push_str(
                            slice_chars(content, o_pos + o_len - c_pos, c_len)
                                .expect("suffix within bounds"),
                        );
                    }

                    check_intersection(content, c_pos, other_content, o_pos)?;

                    let new_pos = transform_position(c_pos, other_c, false);
                    // A comment shrunk to nothing is still appended; it
                    // keeps marking its (now empty) range.
                    append(dest, c.with_parts(new_pos, new_content));
                }
            }
            TextOp::Comment { .. } => append(dest, c.clone()),
        },
    }
    Ok(())
}

/// Verify that two overlapping range operations claim the same text in
/// their intersection.
fn check_intersection(
    c_content: &str,
    c_pos: usize,
    other_content: &str,
    other_pos: usize,
) -> Result<(), OtError> {
    let c_len = char_count(c_content);
    let o_len = char_count(other_content);
    let start = c_pos.max(other_pos);
    let end = (c_pos + c_len).min(other_pos + o_len);
    let c_slice = slice_chars(c_content, start - c_pos, end - c_pos);
    let o_slice = slice_chars(other_content, start - other_pos, end - other_pos);
    if c_slice != o_slice {
        return Err(OtError::DeleteMismatch);
    }
    Ok(())
}

/// Transform operation list `op` so it applies after `other_op`.
///
/// Each component of `op` is carried through every component of
/// `other_op` in order (splits included), then appended to the result.
pub fn transform(op: &[TextOp], other_op: &[TextOp], side: Side) -> Result<Vec<TextOp>, OtError> {
    let mut new_op = Vec::new();
    for c in op {
        let mut fragments = vec![c.clone()];
        for other_c in other_op {
            let mut next = Vec::new();
            for fragment in &fragments {
                transform_component(&mut next, fragment, other_c, side)?;
            }
            fragments = next;
        }
        for fragment in fragments {
            append(&mut new_op, fragment);
        }
    }
    Ok(new_op)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::ranges::CommentTracker;

    fn insert(position: usize, content: &str) -> TextOp {
        TextOp::Insert {
            position,
            content: content.to_string(),
        }
    }

    fn delete(position: usize, content: &str) -> TextOp {
        TextOp::Delete {
            position,
            content: content.to_string(),
        }
    }

    fn comment(position: usize, content: &str, thread: &str) -> TextOp {
        TextOp::Comment {
            position,
            content: content.to_string(),
            thread: thread.to_string(),
        }
    }

    // ── Apply ───────────────────────────────────────────────────────

    #[test]
    fn test_apply_insert() {
        assert_eq!(apply("123", &[insert(1, "a")]).unwrap(), "1a23");
        assert_eq!(apply("123", &[insert(0, "a")]).unwrap(), "a123");
        assert_eq!(apply("123", &[insert(3, "a")]).unwrap(), "123a");
    }

    #[test]
    fn test_apply_ops_sequentially() {
        let result = apply("123", &[insert(1, "a"), delete(2, "2")]).unwrap();
        assert_eq!(result, "1a3");
    }

    #[test]
    fn test_apply_insert_out_of_bounds() {
        let err = apply("123", &[insert(4, "a")]).unwrap_err();
        assert!(matches!(err, OtError::OutOfBounds { position: 4, .. }));
    }

    #[test]
    fn test_apply_delete_verifies_content() {
        assert_eq!(apply("foo123bar", &[delete(3, "123")]).unwrap(), "foobar");

        let err = apply("foo123bar", &[delete(3, "456")]).unwrap_err();
        match err {
            OtError::ContentMismatch {
                kind,
                position,
                expected,
                found,
            } => {
                assert_eq!(kind, "delete");
                assert_eq!(position, 3);
                assert_eq!(expected, "456");
                assert_eq!(found, "123");
            }
            other => panic!("expected ContentMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_comment_verifies_but_does_not_mutate() {
        assert_eq!(apply("123", &[comment(1, "2", "t1")]).unwrap(), "123");

        let err = apply("123", &[comment(1, "9", "t1")]).unwrap_err();
        assert!(matches!(
            err,
            OtError::ContentMismatch { kind: "comment", .. }
        ));
    }

    // ── Transform pairwise rules ────────────────────────────────────

    #[test]
    fn test_insert_vs_insert_tie_break() {
        let mut left = Vec::new();
        transform_component(&mut left, &insert(3, "a"), &insert(3, "xy"), Side::Left).unwrap();
        assert_eq!(left, vec![insert(3, "a")]);

        let mut right = Vec::new();
        transform_component(&mut right, &insert(3, "a"), &insert(3, "xy"), Side::Right).unwrap();
        assert_eq!(right, vec![insert(5, "a")]);
    }

    #[test]
    fn test_insert_vs_delete_before_and_after() {
        // Delete entirely before the insert shifts it left.
        let mut dest = Vec::new();
        transform_component(&mut dest, &insert(5, "a"), &delete(0, "xy"), Side::Left).unwrap();
        assert_eq!(dest, vec![insert(3, "a")]);

        // Delete after the insert has no effect.
        let mut dest = Vec::new();
        transform_component(&mut dest, &insert(1, "a"), &delete(2, "xy"), Side::Left).unwrap();
        assert_eq!(dest, vec![insert(1, "a")]);

        // Insert inside the deleted range collapses to the delete start.
        let mut dest = Vec::new();
        transform_component(&mut dest, &insert(2, "a"), &delete(1, "xyz"), Side::Left).unwrap();
        assert_eq!(dest, vec![insert(1, "a")]);
    }

    #[test]
    fn test_delete_split_by_interior_insert() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &delete(0, "123"), &insert(1, "x"), Side::Left).unwrap();
        assert_eq!(dest, vec![delete(0, "1"), delete(1, "23")]);

        // Check against the document: both paths agree.
        let doc = apply("123", &[insert(1, "x")]).unwrap();
        assert_eq!(apply(&doc, &dest).unwrap(), "x");
    }

    #[test]
    fn test_delete_vs_delete_full_containment_yields_nothing() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &delete(1, "23"), &delete(0, "1234"), Side::Left).unwrap();
        assert!(dest.is_empty());
    }

    #[test]
    fn test_delete_vs_delete_partial_overlap() {
        // doc "abcdef": c deletes "cde" (2..5), other deletes "bcd" (1..4).
        let mut dest = Vec::new();
        transform_component(&mut dest, &delete(2, "cde"), &delete(1, "bcd"), Side::Left).unwrap();
        assert_eq!(dest, vec![delete(1, "e")]);

        let doc = apply("abcdef", &[delete(1, "bcd")]).unwrap();
        assert_eq!(apply(&doc, &dest).unwrap(), "af");
    }

    #[test]
    fn test_delete_vs_delete_conflicting_text_is_an_error() {
        let mut dest = Vec::new();
        let err =
            transform_component(&mut dest, &delete(0, "ab"), &delete(0, "xy"), Side::Left)
                .unwrap_err();
        assert!(matches!(err, OtError::DeleteMismatch));
    }

    #[test]
    fn test_comment_left_edge_insert_shifts_without_extending() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &comment(3, "foo", "t1"), &insert(3, "bar"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![comment(6, "foo", "t1")]);
    }

    #[test]
    fn test_comment_right_edge_insert_leaves_comment_alone() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &comment(0, "foo", "t1"), &insert(3, "bar"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![comment(0, "foo", "t1")]);
    }

    #[test]
    fn test_comment_interior_insert_extends_content() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &comment(0, "foo", "t1"), &insert(1, "X"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![comment(0, "fXoo", "t1")]);
    }

    #[test]
    fn test_comment_shrunk_by_overlapping_delete() {
        // doc "abcdef": comment on "bcd" (1..4), delete of "cde" (2..5).
        let mut dest = Vec::new();
        transform_component(&mut dest, &comment(1, "bcd", "t1"), &delete(2, "cde"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![comment(1, "b", "t1")]);

        // Fully contained comment shrinks to an empty range.
        let mut dest = Vec::new();
        transform_component(&mut dest, &comment(2, "cd", "t1"), &delete(1, "bcde"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![comment(1, "", "t1")]);
    }

    #[test]
    fn test_comments_do_not_affect_content_ops_or_each_other() {
        let mut dest = Vec::new();
        transform_component(&mut dest, &insert(1, "a"), &comment(0, "123", "t1"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![insert(1, "a")]);

        let mut dest = Vec::new();
        transform_component(&mut dest, &delete(1, "2"), &comment(0, "123", "t1"), Side::Left)
            .unwrap();
        assert_eq!(dest, vec![delete(1, "2")]);

        let mut dest = Vec::new();
        transform_component(
            &mut dest,
            &comment(0, "12", "t1"),
            &comment(1, "23", "t2"),
            Side::Left,
        )
        .unwrap();
        assert_eq!(dest, vec![comment(0, "12", "t1")]);
    }

    // ── Compose / invert / cursor ───────────────────────────────────

    #[test]
    fn test_append_merges_adjacent_inserts() {
        let mut ops = vec![insert(1, "ab")];
        append(&mut ops, insert(2, "c"));
        assert_eq!(ops, vec![insert(1, "acb")]);
    }

    #[test]
    fn test_append_merges_adjacent_deletes() {
        let mut ops = vec![delete(2, "cd")];
        append(&mut ops, delete(1, "be"));
        assert_eq!(ops, vec![delete(1, "bcde")]);
    }

    #[test]
    fn test_append_drops_empty_content_ops_but_keeps_empty_comments() {
        let mut ops = Vec::new();
        append(&mut ops, insert(0, ""));
        append(&mut ops, delete(0, ""));
        assert!(ops.is_empty());
        append(&mut ops, comment(0, "", "t1"));
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_compose_applies_like_the_parts() {
        let op1 = vec![insert(0, "ab")];
        let op2 = vec![insert(1, "x"), delete(3, "b")];
        let composed = compose(&op1, &op2);

        let step = apply(&apply("", &op1).unwrap(), &op2).unwrap();
        assert_eq!(apply("", &composed).unwrap(), step);
    }

    #[test]
    fn test_invert_round_trips() {
        let op = vec![insert(0, "abc"), delete(1, "b")];
        let doc = apply("", &op).unwrap();
        let inverse = invert(&op).unwrap();
        assert_eq!(apply(&doc, &inverse).unwrap(), "");
    }

    #[test]
    fn test_invert_rejects_comments() {
        assert!(matches!(
            invert(&[comment(0, "a", "t1")]),
            Err(OtError::NotInvertible)
        ));
    }

    #[test]
    fn test_transform_cursor() {
        let op = vec![insert(2, "ab"), delete(5, "x")];
        assert_eq!(transform_cursor(1, &op, Side::Left), 1);
        assert_eq!(transform_cursor(2, &op, Side::Left), 2);
        assert_eq!(transform_cursor(2, &op, Side::Right), 4);
        assert_eq!(transform_cursor(7, &op, Side::Left), 8);
    }

    // ── Convergence ─────────────────────────────────────────────────

    /// Every single-character and substring insert, delete, and comment
    /// valid against the sample document `"123"`.
    fn convergence_ops() -> Vec<TextOp> {
        let doc = "123";
        let mut ops = Vec::new();
        for position in 0..=doc.len() {
            ops.push(insert(position, "a"));
            ops.push(insert(position, "ab"));
        }
        for start in 0..doc.len() {
            for end in start + 1..=doc.len() {
                ops.push(delete(start, &doc[start..end]));
                ops.push(comment(
                    start,
                    &doc[start..end],
                    &format!("t-{start}-{end}"),
                ));
            }
        }
        ops
    }

    fn tracked_comments(base: &TextOp, transformed: &[TextOp]) -> Vec<(String, usize, String)> {
        let mut tracker = CommentTracker::new();
        tracker.apply_op(base).unwrap();
        for op in transformed {
            tracker.apply_op(op).unwrap();
        }
        let mut ranges: Vec<(String, usize, String)> = tracker
            .comments()
            .iter()
            .map(|c| (c.thread.clone(), c.position, c.content.clone()))
            .collect();
        ranges.sort();
        ranges
    }

    /// The core law: for every pair of concurrent operations, applying
    /// them in either order (with the counterpart transformed) produces
    /// the same document and the same comment-range set.
    #[test]
    fn test_transform_apply_convergence_exhaustive() {
        let doc = "123";
        let ops = convergence_ops();
        for a in &ops {
            for b in &ops {
                let b_after_a =
                    transform(std::slice::from_ref(b), std::slice::from_ref(a), Side::Right)
                        .unwrap();
                let a_after_b =
                    transform(std::slice::from_ref(a), std::slice::from_ref(b), Side::Left)
                        .unwrap();

                let doc_a = apply(doc, std::slice::from_ref(a)).unwrap();
                let doc_ab = apply(&doc_a, &b_after_a).unwrap();
                let doc_b = apply(doc, std::slice::from_ref(b)).unwrap();
                let doc_ba = apply(&doc_b, &a_after_b).unwrap();
                assert_eq!(doc_ab, doc_ba, "document divergence for A={a:?} B={b:?}");

                let ranges_ab = tracked_comments(a, &b_after_a);
                let ranges_ba = tracked_comments(b, &a_after_b);
                assert_eq!(
                    ranges_ab, ranges_ba,
                    "comment-range divergence for A={a:?} B={b:?}"
                );
            }
        }
    }

    /// The concrete example from the convergence law: insert "a" at 1
    /// against delete "2" at 1.
    #[test]
    fn test_convergence_concrete_example() {
        let op_a = insert(1, "a");
        let op_b = delete(1, "2");

        let b_after_a = transform(
            std::slice::from_ref(&op_b),
            std::slice::from_ref(&op_a),
            Side::Right,
        )
        .unwrap();
        let a_after_b = transform(
            std::slice::from_ref(&op_a),
            std::slice::from_ref(&op_b),
            Side::Left,
        )
        .unwrap();

        let one = apply(&apply("123", &[op_a]).unwrap(), &b_after_a).unwrap();
        let two = apply(&apply("123", &[op_b]).unwrap(), &a_after_b).unwrap();
        assert_eq!(one, two);
        assert_eq!(one, "1a3");
    }
}
