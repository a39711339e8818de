use std::collections::HashMap;

use crate::{CourseId, Lesson, LessonId, Time, UserId};

/// How far a student went through the lessons of a course
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CourseProgress {
    pub course_id: CourseId,
    pub student_id: UserId,

    /// In course order
    pub completed_lessons: Vec<LessonId>,

    /// The lesson the student completed most recently
    pub last_completed: Option<LessonId>,

    pub total_lessons: u64,

    /// Rounded to the nearest integer, halves rounding up
    pub completion_percentage: u64,
}

impl CourseProgress {
    /// Computes the progress from all the lessons of the course, ordered by
    /// position, and from the times at which the student completed some of
    /// them. Completions of lessons that are not listed are ignored.
    pub fn compute(
        course_id: CourseId,
        student_id: UserId,
        lessons: &[Lesson],
        completions: &[(LessonId, Time)],
    ) -> CourseProgress {
        let completed_at = completions.iter().copied().collect::<HashMap<_, _>>();
        let completed_lessons = lessons
            .iter()
            .map(|l| l.id)
            .filter(|l| completed_at.contains_key(l))
            .collect::<Vec<_>>();
        let last_completed = completed_lessons
            .iter()
            .max_by_key(|l| (completed_at[*l], **l))
            .copied();
        let total_lessons = lessons.len() as u64;
        let done = completed_lessons.len() as u64;
        let completion_percentage = match total_lessons {
            0 => 0,
            total => (200 * done + total) / (2 * total),
        };
        CourseProgress {
            course_id,
            student_id,
            completed_lessons,
            last_completed,
            total_lessons,
            completion_percentage,
        }
    }
}
