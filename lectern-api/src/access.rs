use anyhow::Context;

use crate::{Comment, CommentId, Course, CourseId, Db, Error, Lesson, LessonId, Room, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommentAction {
    Edit,
    Delete,
}

/// What an actor may do to an existing comment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommentAccess {
    /// Only the author may edit a comment
    pub can_edit: bool,

    /// The author and the course instructor may delete a comment
    pub can_delete: bool,
}

impl CommentAccess {
    pub fn compute(actor: UserId, comment: &Comment, course: &Course) -> CommentAccess {
        let is_owner = comment.owner_id == actor;
        CommentAccess {
            can_edit: is_owner,
            can_delete: is_owner || course.is_instructor(actor),
        }
    }

    pub fn allows(&self, action: CommentAction) -> bool {
        match action {
            CommentAction::Edit => self.can_edit,
            CommentAction::Delete => self.can_delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CourseAction {
    Read,
    Comment,
    Manage,
}

/// What an actor may do within a course
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CourseAccess {
    pub can_read: bool,
    pub can_comment: bool,
    pub can_manage: bool,
}

impl CourseAccess {
    pub fn compute(actor: UserId, course: &Course) -> CourseAccess {
        let is_instructor = course.is_instructor(actor);
        let is_member = is_instructor || course.is_enrolled(actor);
        CourseAccess {
            can_read: is_member,
            can_comment: is_member,
            can_manage: is_instructor,
        }
    }

    pub fn allows(&self, action: CourseAction) -> bool {
        match action {
            CourseAction::Read => self.can_read,
            CourseAction::Comment => self.can_comment,
            CourseAction::Manage => self.can_manage,
        }
    }
}

// The check_* functions load everything they need from `db`, reporting a
// missing entity as `NotFound` before looking at permissions.

pub async fn check_course<D: Db>(
    db: &mut D,
    actor: UserId,
    course_id: CourseId,
    action: CourseAction,
) -> anyhow::Result<Result<Course, Error>> {
    let course = match db
        .course(course_id)
        .await
        .with_context(|| format!("fetching course {course_id:?}"))?
    {
        None => return Ok(Err(Error::NotFound(course_id.0))),
        Some(c) => c,
    };
    match CourseAccess::compute(actor, &course).allows(action) {
        true => Ok(Ok(course)),
        false => Ok(Err(Error::PermissionDenied)),
    }
}

pub async fn check_lesson<D: Db>(
    db: &mut D,
    actor: UserId,
    lesson_id: LessonId,
    action: CourseAction,
) -> anyhow::Result<Result<(Lesson, Course), Error>> {
    let lesson = match db
        .lesson(lesson_id)
        .await
        .with_context(|| format!("fetching lesson {lesson_id:?}"))?
    {
        None => return Ok(Err(Error::NotFound(lesson_id.0))),
        Some(l) => l,
    };
    Ok(check_course(db, actor, lesson.course_id, action)
        .await?
        .map(|course| (lesson, course)))
}

pub async fn check_comment<D: Db>(
    db: &mut D,
    actor: UserId,
    comment_id: CommentId,
    action: CommentAction,
) -> anyhow::Result<Result<(Comment, Course), Error>> {
    let comment = match db
        .comment(comment_id)
        .await
        .with_context(|| format!("fetching comment {comment_id:?}"))?
    {
        None => return Ok(Err(Error::NotFound(comment_id.0))),
        Some(c) => c,
    };
    let lesson = match db
        .lesson(comment.lesson_id)
        .await
        .with_context(|| format!("fetching lesson of comment {comment_id:?}"))?
    {
        None => return Ok(Err(Error::NotFound(comment.lesson_id.0))),
        Some(l) => l,
    };
    let course = match db
        .course(lesson.course_id)
        .await
        .with_context(|| format!("fetching course of lesson {:?}", lesson.id))?
    {
        None => return Ok(Err(Error::NotFound(lesson.course_id.0))),
        Some(c) => c,
    };
    match CommentAccess::compute(actor, &comment, &course).allows(action) {
        true => Ok(Ok((comment, course))),
        false => Ok(Err(Error::PermissionDenied)),
    }
}

/// Whether `actor` may subscribe to the events of `room`
pub async fn may_join<D: Db>(db: &mut D, actor: UserId, room: Room) -> anyhow::Result<bool> {
    Ok(match room {
        Room::Course(c) => check_course(db, actor, c, CourseAction::Read).await?.is_ok(),
        Room::Lesson(l) => check_lesson(db, actor, l, CourseAction::Read).await?.is_ok(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::{MemDb, NewComment, NewCourse, NewLesson, Role, User};

    const AUTHOR: UserId = UserId(Uuid::from_u128(1));
    const INSTRUCTOR: UserId = UserId(Uuid::from_u128(2));
    const STUDENT: UserId = UserId(Uuid::from_u128(3));
    const STRANGER: UserId = UserId(Uuid::from_u128(4));

    struct Setup {
        db: MemDb,
        course: CourseId,
        lesson: LessonId,
        comment: CommentId,
    }

    fn setup() -> Setup {
        let mut db = MemDb::new();
        for (id, name, role) in [
            (AUTHOR, "author", Role::Student),
            (INSTRUCTOR, "instructor", Role::Instructor),
            (STUDENT, "student", Role::Student),
            (STRANGER, "stranger", Role::Student),
        ] {
            let user = User {
                id,
                name: String::from(name),
                role,
            };
            db.insert_user(user, String::from("hash"));
        }
        let course = CourseId(Uuid::new_v4());
        db.insert_course(
            INSTRUCTOR,
            NewCourse {
                id: course,
                title: String::from("Databases"),
                description: String::from("Tables and stuff"),
                category: Default::default(),
                level: Default::default(),
            },
            Utc::now(),
        );
        db.enroll(course, AUTHOR);
        db.enroll(course, STUDENT);
        let lesson = LessonId(Uuid::new_v4());
        db.insert_lesson(
            course,
            NewLesson {
                id: lesson,
                title: String::from("Joins"),
                description: String::new(),
            },
            Utc::now(),
        );
        let comment = CommentId(Uuid::new_v4());
        db.insert_comment(
            NewComment {
                id: comment,
                message: String::from("What is a lateral join?"),
                parent_id: None,
            }
            .into_comment(lesson, AUTHOR, Utc::now()),
        );
        Setup {
            db,
            course,
            lesson,
            comment,
        }
    }

    #[test]
    fn comment_access_truth_table() {
        let s = setup();
        let comment = &s.db.comments[&s.comment];
        let course = &s.db.courses[&s.course];
        for (actor, can_edit, can_delete) in [
            (AUTHOR, true, true),
            (INSTRUCTOR, false, true),
            (STUDENT, false, false),
            (STRANGER, false, false),
        ] {
            assert_eq!(
                CommentAccess::compute(actor, comment, course),
                CommentAccess {
                    can_edit,
                    can_delete
                },
                "access of {actor:?}"
            );
        }
    }

    #[test]
    fn instructor_authoring_has_full_access() {
        let s = setup();
        let mut comment = s.db.comments[&s.comment].clone();
        comment.owner_id = INSTRUCTOR;
        let access = CommentAccess::compute(INSTRUCTOR, &comment, &s.db.courses[&s.course]);
        assert!(access.allows(CommentAction::Edit));
        assert!(access.allows(CommentAction::Delete));
    }

    #[test]
    fn course_access() {
        let s = setup();
        let course = &s.db.courses[&s.course];
        assert_eq!(
            CourseAccess::compute(INSTRUCTOR, course),
            CourseAccess {
                can_read: true,
                can_comment: true,
                can_manage: true,
            }
        );
        let student = CourseAccess::compute(STUDENT, course);
        assert!(student.allows(CourseAction::Read));
        assert!(student.allows(CourseAction::Comment));
        assert!(!student.allows(CourseAction::Manage));
        let stranger = CourseAccess::compute(STRANGER, course);
        assert!(!stranger.allows(CourseAction::Read));
    }

    #[test]
    fn random_actors() {
        let s = setup();
        let users = [AUTHOR, INSTRUCTOR, STUDENT, STRANGER];
        bolero::check!()
            .with_type::<(u8, u8, u8, Vec<u8>)>()
            .cloned()
            .for_each(|(actor, owner, instructor, enrolled)| {
                let actor = users[actor as usize % users.len()];
                let mut comment = s.db.comments[&s.comment].clone();
                comment.owner_id = users[owner as usize % users.len()];
                let mut course = s.db.courses[&s.course].clone();
                course.instructor_id = users[instructor as usize % users.len()];
                course.students = enrolled
                    .iter()
                    .map(|u| users[*u as usize % users.len()])
                    .collect();

                let access = CommentAccess::compute(actor, &comment, &course);
                assert_eq!(access.can_edit, actor == comment.owner_id);
                assert_eq!(
                    access.can_delete,
                    actor == comment.owner_id || actor == course.instructor_id
                );
                let access = CourseAccess::compute(actor, &course);
                assert_eq!(access.can_manage, actor == course.instructor_id);
                assert_eq!(
                    access.can_read,
                    actor == course.instructor_id || course.students.contains(&actor)
                );
                assert_eq!(access.can_comment, access.can_read);
            });
    }

    #[tokio::test]
    async fn stranger_cannot_delete() {
        let mut s = setup();
        assert_eq!(
            check_comment(&mut s.db, STRANGER, s.comment, CommentAction::Delete)
                .await
                .unwrap()
                .map(|(c, _)| c.id),
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            check_comment(&mut s.db, INSTRUCTOR, s.comment, CommentAction::Delete)
                .await
                .unwrap()
                .map(|(c, _)| c.id),
            Ok(s.comment)
        );
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let mut s = setup();
        let missing = Uuid::new_v4();
        assert_eq!(
            check_comment(&mut s.db, AUTHOR, CommentId(missing), CommentAction::Edit)
                .await
                .unwrap()
                .map(|(c, _)| c.id),
            Err(Error::NotFound(missing))
        );
        assert_eq!(
            check_lesson(&mut s.db, STRANGER, LessonId(missing), CourseAction::Read)
                .await
                .unwrap()
                .map(|(l, _)| l.id),
            Err(Error::NotFound(missing))
        );
        assert_eq!(
            check_lesson(&mut s.db, STRANGER, s.lesson, CourseAction::Read)
                .await
                .unwrap()
                .map(|(l, _)| l.id),
            Err(Error::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn rooms() {
        let mut s = setup();
        assert!(may_join(&mut s.db, STUDENT, Room::Lesson(s.lesson)).await.unwrap());
        assert!(may_join(&mut s.db, INSTRUCTOR, Room::Course(s.course)).await.unwrap());
        assert!(!may_join(&mut s.db, STRANGER, Room::Course(s.course)).await.unwrap());
        assert!(!may_join(&mut s.db, STUDENT, Room::Lesson(LessonId(Uuid::new_v4())))
            .await
            .unwrap());
    }
}
