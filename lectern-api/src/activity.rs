use chrono::Utc;
use uuid::Uuid;

use crate::{CourseId, Lesson, LessonId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ActivityId(pub Uuid);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ActivityKind {
    LessonAdded,
    LessonUpdated,
    LessonDeleted,
    StudentEnrolled,
    StudentUnenrolled,
    CourseUpdated,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::LessonAdded => "lesson_added",
            ActivityKind::LessonUpdated => "lesson_updated",
            ActivityKind::LessonDeleted => "lesson_deleted",
            ActivityKind::StudentEnrolled => "student_enrolled",
            ActivityKind::StudentUnenrolled => "student_unenrolled",
            ActivityKind::CourseUpdated => "course_updated",
        }
    }

    pub fn from_db(s: &str) -> anyhow::Result<ActivityKind> {
        Ok(match s {
            "lesson_added" => ActivityKind::LessonAdded,
            "lesson_updated" => ActivityKind::LessonUpdated,
            "lesson_deleted" => ActivityKind::LessonDeleted,
            "student_enrolled" => ActivityKind::StudentEnrolled,
            "student_unenrolled" => ActivityKind::StudentUnenrolled,
            "course_updated" => ActivityKind::CourseUpdated,
            _ => return Err(anyhow::anyhow!("unknown activity kind {s:?}")),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ActivityTarget {
    Lesson(LessonId),
    User(UserId),
    Course(CourseId),
}

impl ActivityTarget {
    pub fn to_db(&self) -> (&'static str, Uuid) {
        match self {
            ActivityTarget::Lesson(l) => ("lesson", l.0),
            ActivityTarget::User(u) => ("user", u.0),
            ActivityTarget::Course(c) => ("course", c.0),
        }
    }

    pub fn from_db(kind: &str, id: Uuid) -> anyhow::Result<ActivityTarget> {
        Ok(match kind {
            "lesson" => ActivityTarget::Lesson(LessonId(id)),
            "user" => ActivityTarget::User(UserId(id)),
            "course" => ActivityTarget::Course(CourseId(id)),
            _ => return Err(anyhow::anyhow!("unknown activity target kind {kind:?}")),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Activity {
    pub id: ActivityId,
    pub course_id: CourseId,
    pub actor_id: UserId,
    pub kind: ActivityKind,
    pub description: String,
    pub target: Option<ActivityTarget>,
    pub date: Time,
}

impl Activity {
    fn now(
        course_id: CourseId,
        actor_id: UserId,
        kind: ActivityKind,
        description: String,
        target: Option<ActivityTarget>,
    ) -> Activity {
        Activity {
            id: ActivityId(Uuid::new_v4()),
            course_id,
            actor_id,
            kind,
            description,
            target,
            date: Utc::now(),
        }
    }

    pub fn lesson_added(actor: UserId, lesson: &Lesson) -> Activity {
        Self::now(
            lesson.course_id,
            actor,
            ActivityKind::LessonAdded,
            format!("Added lesson: {}", lesson.title),
            Some(ActivityTarget::Lesson(lesson.id)),
        )
    }

    pub fn lesson_updated(actor: UserId, lesson: &Lesson) -> Activity {
        Self::now(
            lesson.course_id,
            actor,
            ActivityKind::LessonUpdated,
            format!("Updated lesson: {}", lesson.title),
            Some(ActivityTarget::Lesson(lesson.id)),
        )
    }

    /// The lesson no longer exists, so it is not recorded as a target
    pub fn lesson_deleted(actor: UserId, lesson: &Lesson) -> Activity {
        Self::now(
            lesson.course_id,
            actor,
            ActivityKind::LessonDeleted,
            format!("Deleted lesson: {}", lesson.title),
            None,
        )
    }

    pub fn student_enrolled(actor: UserId, course: CourseId) -> Activity {
        Self::now(
            course,
            actor,
            ActivityKind::StudentEnrolled,
            String::from("Enrolled in the course"),
            Some(ActivityTarget::User(actor)),
        )
    }

    pub fn student_unenrolled(actor: UserId, course: CourseId) -> Activity {
        Self::now(
            course,
            actor,
            ActivityKind::StudentUnenrolled,
            String::from("Unenrolled from the course"),
            None,
        )
    }

    pub fn course_updated(actor: UserId, course: CourseId) -> Activity {
        Self::now(
            course,
            actor,
            ActivityKind::CourseUpdated,
            String::from("Updated course details"),
            Some(ActivityTarget::Course(course)),
        )
    }
}

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 100;
pub const DEFAULT_RECENT_LIMIT: u64 = 10;

/// Query parameters of paginated listings. Missing or out-of-range values
/// are normalized rather than rejected.
#[derive(Clone, Copy, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl Pagination {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    /// Limit of the recent activity listing, which has no pages
    pub fn recent_limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        (total + self.limit() - 1) / self.limit()
    }

    /// Cuts this page out of `items`, which must already be sorted
    pub fn cut<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(usize::try_from(self.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(self.limit()).unwrap_or(usize::MAX))
            .collect()
    }

    pub fn paginate(&self, items: Vec<Activity>) -> ActivityPage {
        let total = items.len() as u64;
        self.page_of(self.cut(items), total)
    }

    pub fn page_of(&self, activities: Vec<Activity>, total: u64) -> ActivityPage {
        ActivityPage {
            activities,
            total,
            total_pages: self.total_pages(total),
            current_page: self.page(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u64,
}
