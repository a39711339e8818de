use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::{
    Activity, Comment, CommentId, Course, CourseId, CoursePage, CourseProgress, CourseQuery, Db,
    Lesson, LessonId, NewCourse, NewLesson, Time, User, UserId,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredUser {
    pub user: User,
    pub password_hash: String,
}

/// In-memory store, with every record kept in an arena indexed by its id.
///
/// The insert_* and remove_* functions assume the caller already validated
/// its input and checked permissions.
#[derive(Clone, Debug, Default)]
pub struct MemDb {
    pub users: BTreeMap<UserId, StoredUser>,
    pub courses: HashMap<CourseId, Course>,
    pub lessons: HashMap<LessonId, Lesson>,
    pub comments: HashMap<CommentId, Comment>,

    /// In insertion order
    pub activities: Vec<Activity>,

    /// When each student completed each lesson
    pub completions: BTreeMap<(UserId, LessonId), Time>,
}

impl MemDb {
    pub fn new() -> MemDb {
        MemDb::default()
    }

    pub fn insert_user(&mut self, user: User, password_hash: String) {
        self.users.insert(
            user.id,
            StoredUser {
                user,
                password_hash,
            },
        );
    }

    pub fn user_by_name(&self, name: &str) -> Option<&StoredUser> {
        self.users.values().find(|u| u.user.name == name)
    }

    pub fn insert_course(&mut self, instructor: UserId, c: NewCourse, now: Time) -> Course {
        let course = c.into_course(instructor, now);
        self.courses.insert(course.id, course.clone());
        course
    }

    /// Newest first
    pub fn courses_where<F>(&self, mut filter: F) -> Vec<Course>
    where
        F: FnMut(&Course) -> bool,
    {
        let mut res = self
            .courses
            .values()
            .filter(|c| filter(c))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by_key(|c| (c.created_at, c.id));
        res.reverse();
        res
    }

    /// One page of the course catalog, newest first
    pub fn list_courses(&self, query: &CourseQuery) -> CoursePage {
        let matching = self.courses_where(|c| query.matches(c));
        let total = matching.len() as u64;
        query.page_of(query.pagination().cut(matching), total)
    }

    /// Returns `false` if the user was already enrolled
    pub fn enroll(&mut self, course: CourseId, user: UserId) -> bool {
        self.courses
            .get_mut(&course)
            .map(|c| c.students.insert(user))
            .unwrap_or(false)
    }

    /// Returns `false` if the user was not enrolled
    pub fn unenroll(&mut self, course: CourseId, user: UserId) -> bool {
        self.courses
            .get_mut(&course)
            .map(|c| c.students.remove(&user))
            .unwrap_or(false)
    }

    /// Removes a course along with its lessons, their comments and the course activity
    pub fn remove_course(&mut self, course: CourseId) -> Option<Course> {
        let removed = self.courses.remove(&course)?;
        let lessons = self
            .lessons
            .values()
            .filter(|l| l.course_id == course)
            .map(|l| l.id)
            .collect::<Vec<_>>();
        for l in lessons {
            self.remove_lesson(l);
        }
        self.activities.retain(|a| a.course_id != course);
        Some(removed)
    }

    pub fn insert_lesson(&mut self, course: CourseId, l: NewLesson, now: Time) -> Lesson {
        let position = self.lessons.values().filter(|l| l.course_id == course).count() as i64;
        let lesson = l.into_lesson(course, position, now);
        self.lessons.insert(lesson.id, lesson.clone());
        lesson
    }

    /// Ordered by position
    pub fn lessons_of(&self, course: CourseId) -> Vec<Lesson> {
        let mut res = self
            .lessons
            .values()
            .filter(|l| l.course_id == course)
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by_key(|l| l.position);
        res
    }

    /// Removes a lesson and all its comments, closing the gap in the lesson positions
    pub fn remove_lesson(&mut self, lesson: LessonId) -> Option<Lesson> {
        let removed = self.lessons.remove(&lesson)?;
        self.comments.retain(|_, c| c.lesson_id != lesson);
        self.completions.retain(|(_, l), _| *l != lesson);
        for l in self.lessons.values_mut() {
            if l.course_id == removed.course_id && l.position > removed.position {
                l.position -= 1;
            }
        }
        Some(removed)
    }

    /// Stores lessons whose position changed
    pub fn update_lessons(&mut self, lessons: &[Lesson]) {
        for l in lessons {
            self.lessons.insert(l.id, l.clone());
        }
    }

    /// Returns `false` if the lesson was already completed, in which case
    /// its completion date is kept
    pub fn complete_lesson(&mut self, student: UserId, lesson: LessonId, now: Time) -> bool {
        match self.completions.entry((student, lesson)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        }
    }

    pub fn uncomplete_lesson(&mut self, student: UserId, lesson: LessonId) -> bool {
        self.completions.remove(&(student, lesson)).is_some()
    }

    pub fn progress(&self, course: CourseId, student: UserId) -> CourseProgress {
        let lessons = self.lessons_of(course);
        let completions = lessons
            .iter()
            .filter_map(|l| {
                self.completions
                    .get(&(student, l.id))
                    .map(|date| (l.id, *date))
            })
            .collect::<Vec<_>>();
        CourseProgress::compute(course, student, &lessons, &completions)
    }

    /// Stores a new comment, indexing it in its parent's replies
    pub fn insert_comment(&mut self, comment: Comment) {
        if let Some(parent) = comment.parent_id.and_then(|p| self.comments.get_mut(&p)) {
            parent.replies.push(comment.id);
        }
        self.comments.insert(comment.id, comment);
    }

    pub fn comments_of(&self, lesson: LessonId) -> Vec<Comment> {
        self.comments
            .values()
            .filter(|c| c.lesson_id == lesson)
            .cloned()
            .collect()
    }

    pub fn push_activity(&mut self, activity: Activity) {
        self.activities.push(activity);
    }

    /// Newest first
    pub fn activities_of<F>(&self, mut filter: F) -> Vec<Activity>
    where
        F: FnMut(&Activity) -> bool,
    {
        self.activities
            .iter()
            .rev()
            .filter(|a| filter(a))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Db for MemDb {
    async fn comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        Ok(self.comments.get(&id).cloned())
    }

    async fn lesson(&mut self, id: LessonId) -> anyhow::Result<Option<Lesson>> {
        Ok(self.lessons.get(&id).cloned())
    }

    async fn course(&mut self, id: CourseId) -> anyhow::Result<Option<Course>> {
        Ok(self.courses.get(&id).cloned())
    }

    async fn list_replies(&mut self, id: CommentId) -> anyhow::Result<Vec<CommentId>> {
        Ok(self
            .comments
            .get(&id)
            .map(|c| c.replies.clone())
            .unwrap_or_default())
    }

    async fn remove_comment(&mut self, id: CommentId) -> anyhow::Result<bool> {
        Ok(self.comments.remove(&id).is_some())
    }

    async fn unlink_reply(&mut self, parent: CommentId, reply: CommentId) -> anyhow::Result<()> {
        if let Some(p) = self.comments.get_mut(&parent) {
            p.replies.retain(|r| *r != reply);
        }
        Ok(())
    }
}
