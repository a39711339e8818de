use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::{Error, LessonId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub lesson_id: LessonId,
    pub owner_id: UserId,
    pub message: String,

    /// `None` for top-level comments
    pub parent_id: Option<CommentId>,

    /// Direct replies, oldest first. This is only an index for traversal, the
    /// replies are not owned by this comment.
    pub replies: Vec<CommentId>,

    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub message: String,
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    /// Returns the trimmed message
    pub fn validate(&self) -> Result<String, Error> {
        Ok(String::from(crate::validate_required(
            "message",
            &self.message,
        )?))
    }

    /// Builds the comment as it will be stored, assuming it has been validated
    pub fn into_comment(self, lesson_id: LessonId, owner_id: UserId, now: Time) -> Comment {
        Comment {
            id: self.id,
            lesson_id,
            owner_id,
            message: String::from(self.message.trim()),
            parent_id: self.parent_id,
            replies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub message: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<String, Error> {
        Ok(String::from(crate::validate_required(
            "message",
            &self.message,
        )?))
    }
}

/// One comment of a lesson's discussion, as listed in display order
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThreadedComment {
    pub comment: Comment,

    /// 0 for top-level comments, the parent's depth plus one for replies
    pub depth: u32,
}

impl ThreadedComment {
    /// Flattens all the comments of a lesson into display order: top-level
    /// threads newest first, each immediately followed by its replies, oldest
    /// first, depth-first. Comments whose parent is missing are listed as
    /// top-level threads.
    ///
    /// Reply chains can be arbitrarily deep, so this never recurses.
    pub fn build(comments: Vec<Comment>) -> Vec<ThreadedComment> {
        let known = comments.iter().map(|c| c.id).collect::<HashSet<_>>();
        let mut top_level = Vec::new();
        let mut children = HashMap::<CommentId, Vec<Comment>>::new();
        for c in comments {
            match c.parent_id {
                Some(p) if known.contains(&p) => {
                    children.entry(p).or_insert_with(Vec::new).push(c)
                }
                Some(p) => {
                    tracing::warn!(
                        comment=?c.id,
                        parent=?p,
                        "comment parent is missing, listing as top-level"
                    );
                    top_level.push(c);
                }
                None => top_level.push(c),
            }
        }
        // stacks pop from the end, so siblings are pushed in reverse display order
        for replies in children.values_mut() {
            replies.sort_by_key(|c| (c.created_at, c.id));
            replies.reverse();
        }
        top_level.sort_by_key(|c| (c.created_at, c.id));

        let mut res = Vec::with_capacity(known.len());
        let mut stack = top_level
            .into_iter()
            .map(|c| (c, 0))
            .collect::<Vec<(Comment, u32)>>();
        while let Some((comment, depth)) = stack.pop() {
            if let Some(replies) = children.remove(&comment.id) {
                stack.extend(replies.into_iter().map(|r| (r, depth.saturating_add(1))));
            }
            res.push(ThreadedComment { comment, depth });
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn comment(id: u128, parent: Option<u128>, minutes: i64) -> Comment {
        let date = Utc::now() + Duration::minutes(minutes);
        Comment {
            id: CommentId(Uuid::from_u128(id)),
            lesson_id: LessonId(Uuid::from_u128(0)),
            owner_id: UserId::stub(),
            message: format!("comment {id}"),
            parent_id: parent.map(|p| CommentId(Uuid::from_u128(p))),
            replies: Vec::new(),
            created_at: date,
            updated_at: date,
        }
    }

    fn ids(threads: &[ThreadedComment]) -> Vec<(u128, u32)> {
        threads
            .iter()
            .map(|t| (t.comment.id.0.as_u128(), t.depth))
            .collect()
    }

    #[test]
    fn threads_are_ordered() {
        let threads = ThreadedComment::build(vec![
            comment(1, None, 0),
            comment(2, Some(1), 3),
            comment(3, Some(1), 1),
            comment(4, Some(3), 2),
            comment(5, None, 5),
        ]);
        assert_eq!(ids(&threads), vec![(5, 0), (1, 0), (3, 1), (4, 2), (2, 1)]);
    }

    #[test]
    fn orphans_become_top_level() {
        let threads = ThreadedComment::build(vec![comment(1, None, 0), comment(2, Some(42), 1)]);
        assert_eq!(ids(&threads), vec![(2, 0), (1, 0)]);
    }

    #[test]
    fn deep_reply_chains() {
        const DEPTH: u128 = 20_000;
        let chain = (1..=DEPTH)
            .map(|i| comment(i, (i > 1).then(|| i - 1), i as i64))
            .collect::<Vec<_>>();
        let threads = ThreadedComment::build(chain);
        assert_eq!(threads.len(), DEPTH as usize);
        assert!(threads
            .iter()
            .enumerate()
            .all(|(i, t)| t.depth as usize == i && t.comment.id.0.as_u128() == i as u128 + 1));

        let json = serde_json::to_vec(&threads).unwrap();
        let parsed: Vec<ThreadedComment> = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, threads);
    }

    #[test]
    fn new_comment_validation() {
        let c = NewComment {
            id: CommentId(Uuid::new_v4()),
            message: String::from("   "),
            parent_id: None,
        };
        assert_eq!(c.validate(), Err(Error::MissingField(String::from("message"))));
    }
}
