//! Comment range tracking.
//!
//! Keeps a set of comment ranges (thread id, position, annotated text)
//! up to date as operations are applied to a document.  Fed the same
//! operation stream as the document itself, the tracked ranges always
//! describe text that is actually present — the delete path verifies
//! this and fails on any disagreement.
//!
//! Edge policy matches the transform engine: an insert at a comment's
//! start shifts the whole range, an insert strictly inside grows it, and
//! an insert at its end leaves it untouched.

use super::text::{char_count, inject, slice_chars, OtError, TextOp};

/// One tracked comment range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRange {
    /// Comment thread identifier.
    pub thread: String,
    /// Start offset in the current document.
    pub position: usize,
    /// The annotated text as it currently reads.
    pub content: String,
}

/// Tracks comment ranges across document edits.
#[derive(Debug, Default)]
pub struct CommentTracker {
    comments: Vec<CommentRange>,
}

impl CommentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume tracking from previously stored ranges.
    pub fn with_comments(comments: Vec<CommentRange>) -> Self {
        Self { comments }
    }

    /// The tracked ranges.  Order is insertion order; callers comparing
    /// trackers should compare by membership.
    pub fn comments(&self) -> &[CommentRange] {
        &self.comments
    }

    /// Find a comment by thread id.
    pub fn get_comment(&self, thread: &str) -> Option<&CommentRange> {
        self.comments.iter().find(|c| c.thread == thread)
    }

    /// Update ranges for one applied operation.
    pub fn apply_op(&mut self, op: &TextOp) -> Result<(), OtError> {
        match op {
            TextOp::Insert { position, content } => {
                self.apply_insert(*position, content);
                Ok(())
            }
            TextOp::Delete { position, content } => self.apply_delete(*position, content),
            TextOp::Comment {
                position,
                content,
                thread,
            } => {
                self.add_comment(thread, *position, content);
                Ok(())
            }
        }
    }

    /// Update ranges for a sequence of applied operations.
    pub fn apply_ops(&mut self, ops: &[TextOp]) -> Result<(), OtError> {
        for op in ops {
            self.apply_op(op)?;
        }
        Ok(())
    }

    fn add_comment(&mut self, thread: &str, position: usize, content: &str) {
        if let Some(existing) = self.comments.iter_mut().find(|c| c.thread == thread) {
            // Re-commenting an existing thread moves its range.
            existing.position = position;
            existing.content = content.to_string();
        } else {
            self.comments.push(CommentRange {
                thread: thread.to_string(),
                position,
                content: content.to_string(),
            });
        }
    }

    fn apply_insert(&mut self, position: usize, content: &str) {
        let len = char_count(content);
        for comment in &mut self.comments {
            if position <= comment.position {
                comment.position += len;
            } else if position < comment.position + char_count(&comment.content) {
                let offset = position - comment.position;
                comment.content = inject(&comment.content, offset, content)
                    .expect("offset within comment bounds");
            }
        }
    }

    fn apply_delete(&mut self, position: usize, content: &str) -> Result<(), OtError> {
        let op_start = position;
        let op_len = char_count(content);
        let op_end = op_start + op_len;

        for comment in &mut self.comments {
            let comment_start = comment.position;
            let comment_len = char_count(&comment.content);
            let comment_end = comment_start + comment_len;

            if op_end <= comment_start {
                // Delete fully before the comment.
                comment.position -= op_len;
            } else if op_start >= comment_end {
                // Delete fully after the comment; nothing to do.
            } else {
                // Delete and comment overlap.
                let remaining_before = if op_start <= comment_start {
                    String::new()
                } else {
                    slice_chars(&comment.content, 0, op_start - comment_start)
                        .expect("prefix within bounds")
                        .to_string()
                };
                let remaining_after = if op_end >= comment_end {
                    String::new()
                } else {
                    slice_chars(&comment.content, op_end - comment_start, comment_len)
                        .expect("suffix within bounds")
                        .to_string()
                };

                // The overlapping text must be what the delete claims.
                let removed_start = char_count(&remaining_before);
                let removed_end = comment_len - char_count(&remaining_after);
                let removed = slice_chars(&comment.content, removed_start, removed_end)
                    .expect("removed span within bounds");
                let offset = comment_start.saturating_sub(op_start);
                let claimed = slice_chars(content, offset, op_len)
                    .and_then(|rest| slice_chars(rest, 0, char_count(removed)))
                    .unwrap_or_default();
                if removed != claimed {
                    return Err(OtError::ContentMismatch {
                        kind: "comment",
                        position: comment_start,
                        expected: removed.to_string(),
                        found: claimed.to_string(),
                    });
                }

                comment.position = comment_start.min(op_start);
                comment.content = format!("{remaining_before}{remaining_after}");
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(thread: &str, position: usize, content: &str) -> CommentTracker {
        let mut tracker = CommentTracker::new();
        tracker
            .apply_op(&TextOp::Comment {
                position,
                content: content.to_string(),
                thread: thread.to_string(),
            })
            .unwrap();
        tracker
    }

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

    #[test]
    fn test_insert_before_comment_shifts_it() {
        let mut tracker = tracker_with("t1", 5, "foo");
        tracker.apply_op(&insert(2, "ab")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 7);
        assert_eq!(comment.content, "foo");
    }

    #[test]
    fn test_insert_at_start_shifts_without_extending() {
        let mut tracker = tracker_with("t1", 3, "foo");
        tracker.apply_op(&insert(3, "bar")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 6);
        assert_eq!(comment.content, "foo");
    }

    #[test]
    fn test_insert_inside_comment_grows_it() {
        let mut tracker = tracker_with("t1", 3, "foo");
        tracker.apply_op(&insert(4, "X")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 3);
        assert_eq!(comment.content, "fXoo");
    }

    #[test]
    fn test_insert_at_end_leaves_comment_alone() {
        let mut tracker = tracker_with("t1", 3, "foo");
        tracker.apply_op(&insert(6, "bar")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 3);
        assert_eq!(comment.content, "foo");
    }

    #[test]
    fn test_delete_before_comment_shifts_it() {
        let mut tracker = tracker_with("t1", 5, "foo");
        tracker.apply_op(&delete(1, "ab")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 3);
        assert_eq!(comment.content, "foo");
    }

    #[test]
    fn test_delete_after_comment_is_ignored() {
        let mut tracker = tracker_with("t1", 2, "foo");
        tracker.apply_op(&delete(5, "xy")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 2);
        assert_eq!(comment.content, "foo");
    }

    #[test]
    fn test_overlapping_delete_shrinks_comment() {
        // doc ...: comment "bcd" at 1, delete "cde" at 2.
        let mut tracker = tracker_with("t1", 1, "bcd");
        tracker.apply_op(&delete(2, "cde")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 1);
        assert_eq!(comment.content, "b");
    }

    #[test]
    fn test_containing_delete_empties_comment() {
        let mut tracker = tracker_with("t1", 2, "cd");
        tracker.apply_op(&delete(1, "bcde")).unwrap();
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 1);
        assert_eq!(comment.content, "");
    }

    #[test]
    fn test_delete_content_disagreement_is_an_error() {
        let mut tracker = tracker_with("t1", 0, "abc");
        let err = tracker.apply_op(&delete(1, "xy")).unwrap_err();
        assert!(matches!(err, OtError::ContentMismatch { kind: "comment", .. }));
    }

    #[test]
    fn test_recommenting_a_thread_moves_it() {
        let mut tracker = tracker_with("t1", 0, "ab");
        tracker
            .apply_op(&TextOp::Comment {
                position: 4,
                content: "cd".to_string(),
                thread: "t1".to_string(),
            })
            .unwrap();
        assert_eq!(tracker.comments().len(), 1);
        let comment = tracker.get_comment("t1").unwrap();
        assert_eq!(comment.position, 4);
        assert_eq!(comment.content, "cd");
    }

    #[test]
    fn test_multiple_comments_update_independently() {
        let mut tracker = tracker_with("t1", 0, "ab");
        tracker
            .apply_op(&TextOp::Comment {
                position: 5,
                content: "cd".to_string(),
                thread: "t2".to_string(),
            })
            .unwrap();
        tracker.apply_op(&insert(3, "xy")).unwrap();

        assert_eq!(tracker.get_comment("t1").unwrap().position, 0);
        assert_eq!(tracker.get_comment("t2").unwrap().position, 7);
    }
}
