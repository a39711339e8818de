use std::collections::{BTreeSet, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use lectern_api::{
    Activity, ActivityId, ActivityKind, ActivityPage, ActivityTarget, AuthToken, Category,
    Comment, CommentId, Course, CourseId, CoursePage, CourseProgress, CourseQuery,
    Error as ApiError, Lesson, LessonId, Level, NewSession, NewUser, Pagination, Role, Time,
    User, UserId, Uuid,
};

use crate::Error;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    role: String,
}

impl UserRow {
    fn into_user(self) -> anyhow::Result<User> {
        Ok(User {
            id: UserId(self.id),
            name: self.name,
            role: Role::from_db(&self.role)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    instructor_id: Uuid,
    title: String,
    description: String,
    published: bool,
    category: String,
    level: String,
    created_at: Time,
    updated_at: Time,
}

impl CourseRow {
    fn into_course(self, students: BTreeSet<UserId>) -> anyhow::Result<Course> {
        Ok(Course {
            id: CourseId(self.id),
            instructor_id: UserId(self.instructor_id),
            title: self.title,
            description: self.description,
            published: self.published,
            category: Category::from_db(&self.category)?,
            level: Level::from_db(&self.level)?,
            students,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LessonRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    description: String,
    position: i64,
    created_at: Time,
    updated_at: Time,
}

impl From<LessonRow> for Lesson {
    fn from(l: LessonRow) -> Lesson {
        Lesson {
            id: LessonId(l.id),
            course_id: CourseId(l.course_id),
            title: l.title,
            description: l.description,
            position: l.position,
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    lesson_id: Uuid,
    owner_id: Uuid,
    message: String,
    parent_id: Option<Uuid>,
    created_at: Time,
    updated_at: Time,
}

impl CommentRow {
    fn into_comment(self, replies: Vec<CommentId>) -> Comment {
        Comment {
            id: CommentId(self.id),
            lesson_id: LessonId(self.lesson_id),
            owner_id: UserId(self.owner_id),
            message: self.message,
            parent_id: self.parent_id.map(CommentId),
            replies,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    course_id: Uuid,
    actor_id: Uuid,
    kind: String,
    description: String,
    target_kind: Option<String>,
    target_id: Option<Uuid>,
    date: Time,
}

impl ActivityRow {
    fn into_activity(self) -> anyhow::Result<Activity> {
        let target = match (self.target_kind, self.target_id) {
            (Some(kind), Some(id)) => Some(ActivityTarget::from_db(&kind, id)?),
            _ => None,
        };
        Ok(Activity {
            id: ActivityId(self.id),
            course_id: CourseId(self.course_id),
            actor_id: UserId(self.actor_id),
            kind: ActivityKind::from_db(&self.kind)?,
            description: self.description,
            target,
            date: self.date,
        })
    }
}

const COURSE_COLUMNS: &str =
    "id, instructor_id, title, description, published, category, level, created_at, updated_at";
const LESSON_COLUMNS: &str = "id, course_id, title, description, position, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, lesson_id, owner_id, message, parent_id, created_at, updated_at";
const ACTIVITY_COLUMNS: &str =
    "id, course_id, actor_id, kind, description, target_kind, target_id, date";

pub async fn create_user(
    conn: &mut sqlx::PgConnection,
    user: &NewUser,
) -> anyhow::Result<Result<(), ApiError>> {
    let conflicts = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT id, name FROM users WHERE id = $1 OR name = $2",
    )
    .bind(user.id.0)
    .bind(&user.name)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("checking conflicts for new user {:?}", user.id))?;
    if conflicts.iter().any(|(id, _)| *id == user.id.0) {
        return Ok(Err(ApiError::UuidAlreadyUsed(user.id.0)));
    }
    if !conflicts.is_empty() {
        return Ok(Err(ApiError::NameAlreadyUsed(user.name.clone())));
    }
    sqlx::query("INSERT INTO users (id, name, password_hash, role) VALUES ($1, $2, $3, $4)")
        .bind(user.id.0)
        .bind(&user.name)
        .bind(&user.initial_password_hash)
        .bind(user.role.as_str())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting user {:?}", user.id))?;
    Ok(Ok(()))
}

/// Returns `None` if the user does not exist or the password does not match
pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    session: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let row = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT id, password_hash FROM users WHERE name = $1",
    )
    .bind(&session.user)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("fetching password hash for {:?}", session.user))?;
    let (user, hash) = match row {
        None => return Ok(None),
        Some(r) => r,
    };
    if !session.verify_password(&hash) {
        return Ok(None);
    }

    let token = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, device, login_time, last_active) VALUES ($1, $2, $3, $4, $4)",
    )
    .bind(token.0)
    .bind(user)
    .bind(&session.device)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting new session for {user:?}"))?;
    Ok(Some(token))
}

/// Returns `false` if the session did not exist
pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() == 1)
}

pub async fn recover_session(conn: &mut sqlx::PgConnection, token: AuthToken) -> Result<User, Error> {
    let user = sqlx::query_scalar::<_, Uuid>(
        "UPDATE sessions SET last_active = $1 WHERE id = $2 RETURNING user_id",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(&mut *conn)
    .await
    .context("recovering session")?
    .ok_or_else(Error::permission_denied)?;
    Ok(
        sqlx::query_as::<_, UserRow>("SELECT id, name, role FROM users WHERE id = $1")
            .bind(user)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("fetching user {user:?} of session"))?
            .into_user()?,
    )
}

async fn students_of(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
) -> anyhow::Result<BTreeSet<UserId>> {
    Ok(
        sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM enrollments WHERE course_id = $1")
            .bind(course.0)
            .fetch_all(conn)
            .await
            .with_context(|| format!("listing students of {course:?}"))?
            .into_iter()
            .map(UserId)
            .collect(),
    )
}

pub async fn fetch_course(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
) -> anyhow::Result<Option<Course>> {
    let row = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"
    ))
    .bind(course.0)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("fetching course {course:?}"))?;
    match row {
        None => Ok(None),
        Some(row) => Ok(Some(row.into_course(students_of(conn, course).await?)?)),
    }
}

/// Fills in the students of each course row, keeping the row order
async fn with_students(
    conn: &mut sqlx::PgConnection,
    rows: Vec<CourseRow>,
) -> anyhow::Result<Vec<Course>> {
    let ids = rows.iter().map(|r| r.id).collect::<Vec<_>>();
    let mut students = HashMap::<Uuid, BTreeSet<UserId>>::new();
    for (course, user) in sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT course_id, user_id FROM enrollments WHERE course_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .context("listing enrollments")?
    {
        students.entry(course).or_default().insert(UserId(user));
    }
    rows.into_iter()
        .map(|r| {
            let s = students.remove(&r.id).unwrap_or_default();
            r.into_course(s)
        })
        .collect()
}

// Lowercases ASCII letters only, so that matching does not depend on the
// database locale
const FOLD_CASE: &str = "'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'";

/// One page of the course catalog, newest first
pub async fn list_courses(
    conn: &mut sqlx::PgConnection,
    query: &CourseQuery,
) -> anyhow::Result<CoursePage> {
    let filter = format!(
        "($1::VARCHAR IS NULL OR category = $1)
            AND ($2::VARCHAR IS NULL OR level = $2)
            AND ($3::VARCHAR IS NULL
                OR strpos(translate(title, {FOLD_CASE}), translate($3, {FOLD_CASE})) > 0
                OR strpos(translate(description, {FOLD_CASE}), translate($3, {FOLD_CASE})) > 0)"
    );
    let category = query.category.map(|c| c.as_str());
    let level = query.level.map(|l| l.as_str());
    let search = query.search();
    let total =
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM courses WHERE {filter}"))
            .bind(category)
            .bind(level)
            .bind(search)
            .fetch_one(&mut *conn)
            .await
            .context("counting courses")?;
    let page = query.pagination();
    let rows = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE {filter}
            ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
    ))
    .bind(category)
    .bind(level)
    .bind(search)
    .bind(i64::try_from(page.limit()).unwrap_or(i64::MAX))
    .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await
    .context("listing courses")?;
    let courses = with_students(conn, rows).await?;
    Ok(query.page_of(courses, u64::try_from(total).unwrap_or(0)))
}

/// Courses taught by `instructor`, newest first
pub async fn instructor_courses(
    conn: &mut sqlx::PgConnection,
    instructor: UserId,
) -> anyhow::Result<Vec<Course>> {
    let rows = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE instructor_id = $1
            ORDER BY created_at DESC, id DESC"
    ))
    .bind(instructor.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("listing courses taught by {instructor:?}"))?;
    with_students(conn, rows).await
}

/// Courses `student` is enrolled in, newest first
pub async fn enrolled_courses(
    conn: &mut sqlx::PgConnection,
    student: UserId,
) -> anyhow::Result<Vec<Course>> {
    let rows = sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses
            WHERE id IN (SELECT course_id FROM enrollments WHERE user_id = $1)
            ORDER BY created_at DESC, id DESC"
    ))
    .bind(student.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("listing courses of {student:?}"))?;
    with_students(conn, rows).await
}

pub async fn create_course(
    conn: &mut sqlx::PgConnection,
    course: &Course,
) -> anyhow::Result<Result<(), ApiError>> {
    let res = sqlx::query(&format!(
        "INSERT INTO courses ({COURSE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING"
    ))
    .bind(course.id.0)
    .bind(course.instructor_id.0)
    .bind(&course.title)
    .bind(&course.description)
    .bind(course.published)
    .bind(course.category.as_str())
    .bind(course.level.as_str())
    .bind(course.created_at)
    .bind(course.updated_at)
    .execute(conn)
    .await
    .with_context(|| format!("inserting course {:?}", course.id))?;
    match res.rows_affected() {
        1 => Ok(Ok(())),
        _ => Ok(Err(ApiError::UuidAlreadyUsed(course.id.0))),
    }
}

pub async fn update_course(conn: &mut sqlx::PgConnection, course: &Course) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE courses SET title = $2, description = $3, published = $4, category = $5,
            level = $6, updated_at = $7 WHERE id = $1",
    )
    .bind(course.id.0)
    .bind(&course.title)
    .bind(&course.description)
    .bind(course.published)
    .bind(course.category.as_str())
    .bind(course.level.as_str())
    .bind(course.updated_at)
    .execute(conn)
    .await
    .with_context(|| format!("updating course {:?}", course.id))?;
    Ok(())
}

/// Lessons, their comments, enrollments and activity all cascade
pub async fn delete_course(conn: &mut sqlx::PgConnection, course: CourseId) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(course.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting course {course:?}"))?;
    Ok(())
}

/// Returns `false` if the user was already enrolled
pub async fn enroll(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
    user: UserId,
) -> anyhow::Result<bool> {
    let res = sqlx::query("INSERT INTO enrollments VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(course.0)
        .bind(user.0)
        .execute(conn)
        .await
        .with_context(|| format!("enrolling {user:?} in {course:?}"))?;
    Ok(res.rows_affected() == 1)
}

/// Returns `false` if the user was not enrolled
pub async fn unenroll(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
    user: UserId,
) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM enrollments WHERE course_id = $1 AND user_id = $2")
        .bind(course.0)
        .bind(user.0)
        .execute(conn)
        .await
        .with_context(|| format!("unenrolling {user:?} from {course:?}"))?;
    Ok(res.rows_affected() == 1)
}

pub async fn fetch_lesson(
    conn: &mut sqlx::PgConnection,
    lesson: LessonId,
) -> anyhow::Result<Option<Lesson>> {
    Ok(sqlx::query_as::<_, LessonRow>(&format!(
        "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = $1"
    ))
    .bind(lesson.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching lesson {lesson:?}"))?
    .map(Lesson::from))
}

/// Ordered by position
pub async fn list_lessons(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
) -> anyhow::Result<Vec<Lesson>> {
    Ok(sqlx::query_as::<_, LessonRow>(&format!(
        "SELECT {LESSON_COLUMNS} FROM lessons WHERE course_id = $1 ORDER BY position"
    ))
    .bind(course.0)
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing lessons of {course:?}"))?
    .into_iter()
    .map(Lesson::from)
    .collect())
}

pub async fn count_lessons(conn: &mut sqlx::PgConnection, course: CourseId) -> anyhow::Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM lessons WHERE course_id = $1")
        .bind(course.0)
        .fetch_one(conn)
        .await
        .with_context(|| format!("counting lessons of {course:?}"))
}

pub async fn create_lesson(
    conn: &mut sqlx::PgConnection,
    lesson: &Lesson,
) -> anyhow::Result<Result<(), ApiError>> {
    let res = sqlx::query(
        "INSERT INTO lessons VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
    )
    .bind(lesson.id.0)
    .bind(lesson.course_id.0)
    .bind(&lesson.title)
    .bind(&lesson.description)
    .bind(lesson.position)
    .bind(lesson.created_at)
    .bind(lesson.updated_at)
    .execute(conn)
    .await
    .with_context(|| format!("inserting lesson {:?}", lesson.id))?;
    match res.rows_affected() {
        1 => Ok(Ok(())),
        _ => Ok(Err(ApiError::UuidAlreadyUsed(lesson.id.0))),
    }
}

pub async fn update_lesson(conn: &mut sqlx::PgConnection, lesson: &Lesson) -> anyhow::Result<()> {
    sqlx::query("UPDATE lessons SET title = $2, description = $3, updated_at = $4 WHERE id = $1")
        .bind(lesson.id.0)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(lesson.updated_at)
        .execute(conn)
        .await
        .with_context(|| format!("updating lesson {:?}", lesson.id))?;
    Ok(())
}

/// Deletes the lesson along with its comments, then closes the gap it left
/// in the course's lesson positions
pub async fn delete_lesson(conn: &mut sqlx::PgConnection, lesson: &Lesson) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(lesson.id.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("deleting lesson {:?}", lesson.id))?;
    sqlx::query("UPDATE lessons SET position = position - 1 WHERE course_id = $1 AND position > $2")
        .bind(lesson.course_id.0)
        .bind(lesson.position)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("renumbering lessons of {:?}", lesson.course_id))?;
    Ok(())
}

/// Stores the new positions of `lessons` all at once
pub async fn reorder_lessons(
    conn: &mut sqlx::PgConnection,
    lessons: &[Lesson],
) -> anyhow::Result<()> {
    let mut tx = sqlx::Connection::begin(&mut *conn)
        .await
        .context("starting lesson reorder")?;
    for l in lessons {
        sqlx::query("UPDATE lessons SET position = $2, updated_at = $3 WHERE id = $1")
            .bind(l.id.0)
            .bind(l.position)
            .bind(l.updated_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("moving lesson {:?} to {}", l.id, l.position))?;
    }
    tx.commit().await.context("committing lesson reorder")?;
    Ok(())
}

/// Marks `lesson` as completed by `student`, keeping the first completion date
pub async fn complete_lesson(
    conn: &mut sqlx::PgConnection,
    student: UserId,
    lesson: &Lesson,
    now: Time,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO lesson_completions (lesson_id, user_id, course_id, completed_at)
            VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
    )
    .bind(lesson.id.0)
    .bind(student.0)
    .bind(lesson.course_id.0)
    .bind(now)
    .execute(conn)
    .await
    .with_context(|| format!("completing {:?} for {student:?}", lesson.id))?;
    Ok(())
}

pub async fn uncomplete_lesson(
    conn: &mut sqlx::PgConnection,
    student: UserId,
    lesson: LessonId,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM lesson_completions WHERE lesson_id = $1 AND user_id = $2")
        .bind(lesson.0)
        .bind(student.0)
        .execute(conn)
        .await
        .with_context(|| format!("uncompleting {lesson:?} for {student:?}"))?;
    Ok(())
}

pub async fn course_progress(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
    student: UserId,
) -> anyhow::Result<CourseProgress> {
    let lessons = list_lessons(&mut *conn, course).await?;
    let completions = sqlx::query_as::<_, (Uuid, Time)>(
        "SELECT lesson_id, completed_at FROM lesson_completions
            WHERE course_id = $1 AND user_id = $2",
    )
    .bind(course.0)
    .bind(student.0)
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing completions of {student:?} in {course:?}"))?
    .into_iter()
    .map(|(lesson, date)| (LessonId(lesson), date))
    .collect::<Vec<_>>();
    Ok(CourseProgress::compute(course, student, &lessons, &completions))
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let row = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"
    ))
    .bind(comment.0)
    .fetch_optional(&mut *conn)
    .await
    .with_context(|| format!("fetching comment {comment:?}"))?;
    match row {
        None => Ok(None),
        Some(row) => Ok(Some(row.into_comment(list_replies(conn, comment).await?))),
    }
}

/// Direct replies, oldest first
pub async fn list_replies(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Vec<CommentId>> {
    Ok(sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM comments WHERE parent_id = $1 ORDER BY created_at, id",
    )
    .bind(comment.0)
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing replies of {comment:?}"))?
    .into_iter()
    .map(CommentId)
    .collect())
}

/// All the comments of a lesson, with their reply index filled in
pub async fn list_comments(
    conn: &mut sqlx::PgConnection,
    lesson: LessonId,
) -> anyhow::Result<Vec<Comment>> {
    let mut rows = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE lesson_id = $1"
    ))
    .bind(lesson.0)
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing comments of {lesson:?}"))?;
    rows.sort_by_key(|r| (r.created_at, r.id));
    let mut replies = HashMap::<Uuid, Vec<CommentId>>::new();
    for r in rows.iter() {
        if let Some(p) = r.parent_id {
            replies.entry(p).or_default().push(CommentId(r.id));
        }
    }
    Ok(rows
        .into_iter()
        .map(|r| {
            let rep = replies.remove(&r.id).unwrap_or_default();
            r.into_comment(rep)
        })
        .collect())
}

pub async fn insert_comment(
    conn: &mut sqlx::PgConnection,
    comment: &Comment,
) -> anyhow::Result<Result<(), ApiError>> {
    let res = sqlx::query(
        "INSERT INTO comments VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
    )
    .bind(comment.id.0)
    .bind(comment.lesson_id.0)
    .bind(comment.owner_id.0)
    .bind(&comment.message)
    .bind(comment.parent_id.map(|p| p.0))
    .bind(comment.created_at)
    .bind(comment.updated_at)
    .execute(conn)
    .await
    .with_context(|| format!("inserting comment {:?}", comment.id))?;
    match res.rows_affected() {
        1 => Ok(Ok(())),
        _ => Ok(Err(ApiError::UuidAlreadyUsed(comment.id.0))),
    }
}

pub async fn update_comment(conn: &mut sqlx::PgConnection, comment: &Comment) -> anyhow::Result<()> {
    sqlx::query("UPDATE comments SET message = $2, updated_at = $3 WHERE id = $1")
        .bind(comment.id.0)
        .bind(&comment.message)
        .bind(comment.updated_at)
        .execute(conn)
        .await
        .with_context(|| format!("updating comment {:?}", comment.id))?;
    Ok(())
}

pub async fn insert_activity(
    conn: &mut sqlx::PgConnection,
    activity: &Activity,
) -> anyhow::Result<()> {
    let (target_kind, target_id) = match activity.target.as_ref().map(|t| t.to_db()) {
        Some((k, i)) => (Some(k), Some(i)),
        None => (None, None),
    };
    sqlx::query("INSERT INTO activities VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
        .bind(activity.id.0)
        .bind(activity.course_id.0)
        .bind(activity.actor_id.0)
        .bind(activity.kind.as_str())
        .bind(&activity.description)
        .bind(target_kind)
        .bind(target_id)
        .bind(activity.date)
        .execute(conn)
        .await
        .with_context(|| format!("inserting activity {:?}", activity.id))?;
    Ok(())
}

/// One page of the course's activity, newest first
pub async fn list_course_activities(
    conn: &mut sqlx::PgConnection,
    course: CourseId,
    page: &Pagination,
) -> anyhow::Result<ActivityPage> {
    let total =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM activities WHERE course_id = $1")
            .bind(course.0)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("counting activities of {course:?}"))?;
    let activities = sqlx::query_as::<_, ActivityRow>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE course_id = $1
            ORDER BY date DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(course.0)
    .bind(i64::try_from(page.limit()).unwrap_or(i64::MAX))
    .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing activities of {course:?}"))?
    .into_iter()
    .map(ActivityRow::into_activity)
    .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(page.page_of(activities, u64::try_from(total).unwrap_or(0)))
}

/// Latest activity of all the courses `user` teaches or is enrolled in
pub async fn recent_activities(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    limit: u64,
) -> anyhow::Result<Vec<Activity>> {
    sqlx::query_as::<_, ActivityRow>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities
            WHERE course_id IN (
                SELECT id FROM courses WHERE instructor_id = $1
                UNION SELECT course_id FROM enrollments WHERE user_id = $1
            )
            ORDER BY date DESC, id DESC LIMIT $2"
    ))
    .bind(user.0)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(conn)
    .await
    .with_context(|| format!("listing recent activities for {user:?}"))?
    .into_iter()
    .map(ActivityRow::into_activity)
    .collect()
}

/// Connection-backed implementation of the storage seen by the access checks
/// and the thread walker
pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

#[async_trait]
impl<'a> lectern_api::Db for PostgresDb<'a> {
    async fn comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        fetch_comment(&mut *self.conn, id).await
    }

    async fn lesson(&mut self, id: LessonId) -> anyhow::Result<Option<Lesson>> {
        fetch_lesson(&mut *self.conn, id).await
    }

    async fn course(&mut self, id: CourseId) -> anyhow::Result<Option<Course>> {
        fetch_course(&mut *self.conn, id).await
    }

    async fn list_replies(&mut self, id: CommentId) -> anyhow::Result<Vec<CommentId>> {
        list_replies(&mut *self.conn, id).await
    }

    async fn remove_comment(&mut self, id: CommentId) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting comment {id:?}"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn unlink_reply(&mut self, _parent: CommentId, _reply: CommentId) -> anyhow::Result<()> {
        // replies are derived from parent_id, and the reply row is already gone
        Ok(())
    }
}
