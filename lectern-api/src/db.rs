use async_trait::async_trait;

use crate::{Comment, CommentId, Course, CourseId, Lesson, LessonId};

/// Storage seen by the access checks and the thread walker.
///
/// Every operation is atomic on its own, but nothing is assumed about
/// sequences of operations: another writer may run in-between any two calls.
#[async_trait]
pub trait Db: Send {
    async fn comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>>;
    async fn lesson(&mut self, id: LessonId) -> anyhow::Result<Option<Lesson>>;
    async fn course(&mut self, id: CourseId) -> anyhow::Result<Option<Course>>;

    /// Direct replies of `id`, oldest first. Empty if `id` does not exist.
    async fn list_replies(&mut self, id: CommentId) -> anyhow::Result<Vec<CommentId>>;

    /// Removes a single comment, returning `false` if it was already gone
    async fn remove_comment(&mut self, id: CommentId) -> anyhow::Result<bool>;

    /// Removes `reply` from the reply index of `parent`, if both still exist
    async fn unlink_reply(&mut self, parent: CommentId, reply: CommentId) -> anyhow::Result<()>;
}
