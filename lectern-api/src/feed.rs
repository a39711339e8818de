use crate::{Activity, Comment, CommentId, CourseId, LessonId};

/// A subscription channel of the event feed
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Room {
    Lesson(LessonId),
    Course(CourseId),
}

/// Messages sent by clients on the feed websocket, after authentication
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedRequest {
    Ping,
    Join(Room),
    Leave(Room),
}

/// Messages sent by the server on the feed websocket
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Joined(Room),
    Left(Room),
    JoinDenied(Room),
    NewComment(Comment),
    UpdateComment(Comment),
    DeleteComment {
        lesson_id: LessonId,
        comment_id: CommentId,

        /// Every comment of the thread that got removed, replies first
        removed: Vec<CommentId>,
    },
    NewActivity(Activity),
}

impl FeedRequest {
    pub fn parse(msg: &str) -> Option<FeedRequest> {
        if msg == "ping" {
            return Some(FeedRequest::Ping);
        }
        serde_json::from_str(msg).ok()
    }
}
