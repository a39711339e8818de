use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

pub mod access;
pub use access::{CommentAccess, CommentAction, CourseAccess, CourseAction};

mod activity;
pub use activity::{Activity, ActivityId, ActivityKind, ActivityPage, ActivityTarget, Pagination};

mod auth;
pub use auth::{AuthToken, NewSession, BCRYPT_COST};

mod comment;
pub use comment::{Comment, CommentId, EditComment, NewComment, ThreadedComment};

mod course;
pub use course::{
    Category, Course, CourseId, CoursePage, CourseQuery, CourseUpdate, Level, NewCourse,
};

mod db;
pub use db::Db;

mod error;
pub use error::Error;

mod feed;
pub use feed::{FeedMessage, FeedRequest, Room};

mod lesson;
pub use lesson::{Lesson, LessonId, LessonOrder, LessonUpdate, NewLesson};

mod mem;
pub use mem::{MemDb, StoredUser};

mod progress;
pub use progress::CourseProgress;

pub mod thread;

mod user;
pub use user::{NewUser, Role, User, UserId};

// All the validate_* functions are used to validate user input before it
// reaches a database. They are shared between the server and the mock, so
// that both reject exactly the same inputs.

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Validates a required free-form field, returning its trimmed contents
pub fn validate_required<'a>(field: &str, s: &'a str) -> Result<&'a str, Error> {
    validate_string(s)?;
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::MissingField(String::from(field)));
    }
    Ok(s)
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    validate_string(name)?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::InvalidName(String::from(name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_fields_are_trimmed() {
        assert_eq!(validate_required("message", "  hello \n"), Ok("hello"));
        assert_eq!(
            validate_required("message", " \t "),
            Err(Error::MissingField(String::from("message")))
        );
        assert_eq!(
            validate_required("message", "a\0b"),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
    }

    #[test]
    fn names() {
        assert!(validate_name("jane.doe-42_x").is_ok());
        assert_eq!(validate_name(""), Err(Error::InvalidName(String::new())));
        assert_eq!(
            validate_name("jane doe"),
            Err(Error::InvalidName(String::from("jane doe")))
        );
    }
}
