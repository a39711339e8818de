use std::collections::HashSet;

use uuid::Uuid;

use crate::{CourseId, Error, Time};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct LessonId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Lesson {
    pub id: LessonId,
    pub course_id: CourseId,
    pub title: String,
    pub description: String,

    /// 0-based position of this lesson in its course
    pub position: i64,

    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewLesson {
    pub id: LessonId,
    pub title: String,
    pub description: String,
}

impl NewLesson {
    pub fn validate(&self) -> Result<(String, String), Error> {
        let title = crate::validate_required("title", &self.title)?;
        crate::validate_string(&self.description)?;
        Ok((String::from(title), String::from(self.description.trim())))
    }

    /// Builds the lesson as it will be stored, appended at `position`
    pub fn into_lesson(self, course_id: CourseId, position: i64, now: Time) -> Lesson {
        Lesson {
            id: self.id,
            course_id,
            title: String::from(self.title.trim()),
            description: String::from(self.description.trim()),
            position,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct LessonUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl LessonUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(t) = &self.title {
            crate::validate_required("title", t)?;
        }
        if let Some(d) = &self.description {
            crate::validate_string(d)?;
        }
        Ok(())
    }

    pub fn apply(&self, lesson: &mut Lesson, now: Time) {
        if let Some(t) = &self.title {
            lesson.title = String::from(t.trim());
        }
        if let Some(d) = &self.description {
            lesson.description = String::from(d.trim());
        }
        lesson.updated_at = now;
    }
}

/// The new order of all the lessons of a course, first lesson first
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct LessonOrder {
    pub lesson_ids: Vec<LessonId>,
}

impl LessonOrder {
    /// Lays out `lessons`, which must be exactly the lessons of `course`, in
    /// this order. Every lesson must be listed once, so that positions stay
    /// contiguous.
    pub fn apply(
        &self,
        course: CourseId,
        mut lessons: Vec<Lesson>,
        now: Time,
    ) -> Result<Vec<Lesson>, Error> {
        let listed = self.lesson_ids.iter().collect::<HashSet<_>>();
        if listed.len() != self.lesson_ids.len()
            || listed.len() != lessons.len()
            || lessons.iter().any(|l| !listed.contains(&l.id))
        {
            return Err(Error::InvalidLessonOrder(course.0));
        }
        for l in lessons.iter_mut() {
            let position = self
                .lesson_ids
                .iter()
                .position(|id| *id == l.id)
                .ok_or(Error::InvalidLessonOrder(course.0))?;
            if l.position != position as i64 {
                l.position = position as i64;
                l.updated_at = now;
            }
        }
        lessons.sort_by_key(|l| l.position);
        Ok(lessons)
    }
}
