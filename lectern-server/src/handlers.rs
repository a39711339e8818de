use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, Query, State, WebSocketUpgrade},
    Json,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use lectern_api::{
    access::{self, CommentAction, CourseAction},
    thread, Activity, ActivityPage, AuthToken, Comment, CommentId, Course, CourseId, CoursePage,
    CourseProgress, CourseQuery, CourseUpdate, EditComment, Error as ApiError, FeedMessage, Lesson,
    LessonId, LessonOrder, LessonUpdate, NewComment, NewCourse, NewLesson, NewSession, NewUser,
    Pagination, Role, Room, ThreadedComment, User, UserId, Uuid,
};

use crate::{
    db::{self, PostgresDb},
    extractors::*,
    Error, RoomFeeds,
};

async fn record_activity(
    conn: &mut sqlx::PgConnection,
    feeds: &RoomFeeds,
    activity: Activity,
) -> Result<(), Error> {
    db::insert_activity(&mut *conn, &activity).await?;
    feeds
        .relay(
            Room::Course(activity.course_id),
            FeedMessage::NewActivity(activity),
        )
        .await;
    Ok(())
}

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    ApiJson(data): ApiJson<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, &data)
        .await
        .with_context(|| format!("creating user {:?}", data.id))??;
    Ok(())
}

pub async fn auth(
    mut conn: PgConn,
    ApiJson(data): ApiJson<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(
        db::login_user(&mut *conn, &data)
            .await
            .context("logging user in")?
            .ok_or_else(Error::permission_denied)?,
    ))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<User> {
    Json(user)
}

pub async fn list_courses(
    Auth(_): Auth,
    mut conn: PgConn,
    Query(query): Query<CourseQuery>,
) -> Result<Json<CoursePage>, Error> {
    query.validate()?;
    Ok(Json(db::list_courses(&mut *conn, &query).await?))
}

pub async fn my_courses(Auth(user): Auth, mut conn: PgConn) -> Result<Json<Vec<Course>>, Error> {
    if user.role != Role::Instructor {
        return Err(Error::permission_denied());
    }
    Ok(Json(db::instructor_courses(&mut *conn, user.id).await?))
}

pub async fn enrolled_courses(
    Auth(user): Auth,
    mut conn: PgConn,
) -> Result<Json<Vec<Course>>, Error> {
    if user.role != Role::Student {
        return Err(Error::permission_denied());
    }
    Ok(Json(db::enrolled_courses(&mut *conn, user.id).await?))
}

pub async fn create_course(
    Auth(user): Auth,
    mut conn: PgConn,
    ApiJson(data): ApiJson<NewCourse>,
) -> Result<Json<Course>, Error> {
    if user.role != Role::Instructor {
        return Err(Error::permission_denied());
    }
    data.validate()?;
    let course = data.into_course(user.id, Utc::now());
    db::create_course(&mut *conn, &course).await??;
    Ok(Json(course))
}

pub async fn fetch_course(
    Auth(_): Auth,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<Json<Course>, Error> {
    Ok(Json(
        db::fetch_course(&mut *conn, CourseId(course))
            .await?
            .ok_or_else(|| Error::not_found(course))?,
    ))
}

pub async fn update_course(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
    ApiJson(data): ApiJson<CourseUpdate>,
) -> Result<Json<Course>, Error> {
    data.validate()?;
    let mut course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Manage,
    )
    .await??;
    data.apply(&mut course, Utc::now());
    db::update_course(&mut *conn, &course).await?;
    record_activity(&mut *conn, &feeds, Activity::course_updated(user.id, course.id)).await?;
    Ok(Json(course))
}

pub async fn delete_course(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<(), Error> {
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Manage,
    )
    .await??;
    let lessons = db::list_lessons(&mut *conn, course.id).await?;
    db::delete_course(&mut *conn, course.id).await?;
    tracing::info!(course=?course.id, "deleted course");
    for l in lessons {
        feeds.close(Room::Lesson(l.id)).await;
    }
    feeds.close(Room::Course(course.id)).await;
    Ok(())
}

pub async fn enroll(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<Json<Course>, Error> {
    if user.role != Role::Student {
        return Err(Error::permission_denied());
    }
    let mut course = db::fetch_course(&mut *conn, CourseId(course))
        .await?
        .ok_or_else(|| Error::not_found(course))?;
    if !db::enroll(&mut *conn, course.id, user.id).await? {
        return Err(Error::Api(ApiError::AlreadyEnrolled(course.id.0)));
    }
    course.students.insert(user.id);
    record_activity(&mut *conn, &feeds, Activity::student_enrolled(user.id, course.id)).await?;
    Ok(Json(course))
}

pub async fn unenroll(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<Json<Course>, Error> {
    let mut course = db::fetch_course(&mut *conn, CourseId(course))
        .await?
        .ok_or_else(|| Error::not_found(course))?;
    if !db::unenroll(&mut *conn, course.id, user.id).await? {
        return Err(Error::Api(ApiError::NotEnrolled(course.id.0)));
    }
    course.students.remove(&user.id);
    record_activity(&mut *conn, &feeds, Activity::student_unenrolled(user.id, course.id))
        .await?;
    for l in db::list_lessons(&mut *conn, course.id).await? {
        feeds.evict(Room::Lesson(l.id), user.id).await;
    }
    feeds.evict(Room::Course(course.id), user.id).await;
    Ok(Json(course))
}

pub async fn list_lessons(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<Json<Vec<Lesson>>, Error> {
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Read,
    )
    .await??;
    Ok(Json(db::list_lessons(&mut *conn, course.id).await?))
}

pub async fn create_lesson(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
    ApiJson(data): ApiJson<NewLesson>,
) -> Result<Json<Lesson>, Error> {
    data.validate()?;
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Manage,
    )
    .await??;
    let position = db::count_lessons(&mut *conn, course.id).await?;
    let lesson = data.into_lesson(course.id, position, Utc::now());
    db::create_lesson(&mut *conn, &lesson).await??;
    record_activity(&mut *conn, &feeds, Activity::lesson_added(user.id, &lesson)).await?;
    Ok(Json(lesson))
}

pub async fn fetch_lesson(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
) -> Result<Json<Lesson>, Error> {
    let (lesson, _) = access::check_lesson(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        LessonId(lesson),
        CourseAction::Read,
    )
    .await??;
    Ok(Json(lesson))
}

pub async fn update_lesson(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
    ApiJson(data): ApiJson<LessonUpdate>,
) -> Result<Json<Lesson>, Error> {
    data.validate()?;
    let (mut lesson, _) = access::check_lesson(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        LessonId(lesson),
        CourseAction::Manage,
    )
    .await??;
    data.apply(&mut lesson, Utc::now());
    db::update_lesson(&mut *conn, &lesson).await?;
    record_activity(&mut *conn, &feeds, Activity::lesson_updated(user.id, &lesson)).await?;
    Ok(Json(lesson))
}

pub async fn delete_lesson(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
) -> Result<(), Error> {
    let (lesson, _) = access::check_lesson(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        LessonId(lesson),
        CourseAction::Manage,
    )
    .await??;
    db::delete_lesson(&mut *conn, &lesson).await?;
    record_activity(&mut *conn, &feeds, Activity::lesson_deleted(user.id, &lesson)).await?;
    feeds.close(Room::Lesson(lesson.id)).await;
    Ok(())
}

pub async fn reorder_lessons(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
    ApiJson(data): ApiJson<LessonOrder>,
) -> Result<Json<Vec<Lesson>>, Error> {
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Manage,
    )
    .await??;
    let current = db::list_lessons(&mut *conn, course.id).await?;
    let lessons = data.apply(course.id, current, Utc::now())?;
    db::reorder_lessons(&mut *conn, &lessons).await?;
    Ok(Json(lessons))
}

/// Checks that the caller is a student who can see `lesson`
async fn student_lesson(
    user: &User,
    conn: &mut sqlx::PgConnection,
    lesson: Uuid,
) -> Result<Lesson, Error> {
    if user.role != Role::Student {
        return Err(Error::permission_denied());
    }
    let (lesson, _) = access::check_lesson(
        &mut PostgresDb { conn },
        user.id,
        LessonId(lesson),
        CourseAction::Read,
    )
    .await??;
    Ok(lesson)
}

pub async fn complete_lesson(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
) -> Result<Json<CourseProgress>, Error> {
    let lesson = student_lesson(&user, &mut *conn, lesson).await?;
    db::complete_lesson(&mut *conn, user.id, &lesson, Utc::now()).await?;
    Ok(Json(
        db::course_progress(&mut *conn, lesson.course_id, user.id).await?,
    ))
}

pub async fn uncomplete_lesson(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
) -> Result<Json<CourseProgress>, Error> {
    let lesson = student_lesson(&user, &mut *conn, lesson).await?;
    db::uncomplete_lesson(&mut *conn, user.id, lesson.id).await?;
    Ok(Json(
        db::course_progress(&mut *conn, lesson.course_id, user.id).await?,
    ))
}

pub async fn course_progress(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
) -> Result<Json<CourseProgress>, Error> {
    if user.role != Role::Student {
        return Err(Error::permission_denied());
    }
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Read,
    )
    .await??;
    Ok(Json(
        db::course_progress(&mut *conn, course.id, user.id).await?,
    ))
}

/// Progress in every course the caller is enrolled in, newest course first
pub async fn my_progress(
    Auth(user): Auth,
    mut conn: PgConn,
) -> Result<Json<Vec<CourseProgress>>, Error> {
    if user.role != Role::Student {
        return Err(Error::permission_denied());
    }
    let mut res = Vec::new();
    for course in db::enrolled_courses(&mut *conn, user.id).await? {
        res.push(db::course_progress(&mut *conn, course.id, user.id).await?);
    }
    Ok(Json(res))
}

pub async fn list_comments(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
) -> Result<Json<Vec<ThreadedComment>>, Error> {
    let (lesson, _) = access::check_lesson(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        LessonId(lesson),
        CourseAction::Read,
    )
    .await??;
    Ok(Json(ThreadedComment::build(
        db::list_comments(&mut *conn, lesson.id).await?,
    )))
}

pub async fn add_comment(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(lesson): Path<Uuid>,
    ApiJson(data): ApiJson<NewComment>,
) -> Result<Json<Comment>, Error> {
    data.validate()?;
    let mut db = PostgresDb { conn: &mut *conn };
    let (lesson, _) =
        access::check_lesson(&mut db, user.id, LessonId(lesson), CourseAction::Comment).await??;
    if let Some(parent) = data.parent_id {
        let parent = db::fetch_comment(&mut *db.conn, parent)
            .await?
            .ok_or_else(|| Error::not_found(parent.0))?;
        if parent.lesson_id != lesson.id {
            return Err(Error::Api(ApiError::InvalidParent(parent.id.0)));
        }
    }
    let comment = data.into_comment(lesson.id, user.id, Utc::now());
    db::insert_comment(&mut *db.conn, &comment).await??;
    feeds
        .relay(
            Room::Lesson(lesson.id),
            FeedMessage::NewComment(comment.clone()),
        )
        .await;
    Ok(Json(comment))
}

pub async fn edit_comment(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    ApiJson(data): ApiJson<EditComment>,
) -> Result<Json<Comment>, Error> {
    let message = data.validate()?;
    let (mut comment, _) = access::check_comment(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CommentId(comment),
        CommentAction::Edit,
    )
    .await??;
    comment.message = message;
    comment.updated_at = Utc::now();
    db::update_comment(&mut *conn, &comment).await?;
    feeds
        .relay(
            Room::Lesson(comment.lesson_id),
            FeedMessage::UpdateComment(comment.clone()),
        )
        .await;
    Ok(Json(comment))
}

/// Deletes the comment with its whole reply thread, returning the removed ids
pub async fn delete_comment(
    Auth(user): Auth,
    State(feeds): State<RoomFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<Json<Vec<CommentId>>, Error> {
    let mut db = PostgresDb { conn: &mut *conn };
    let (comment, _) =
        access::check_comment(&mut db, user.id, CommentId(comment), CommentAction::Delete)
            .await??;
    let removed = thread::delete_thread(&mut db, comment.id)
        .await
        .with_context(|| format!("deleting thread of {:?}", comment.id))?;
    tracing::info!(comment=?comment.id, removed=removed.len(), "deleted comment thread");
    feeds
        .relay(
            Room::Lesson(comment.lesson_id),
            FeedMessage::DeleteComment {
                lesson_id: comment.lesson_id,
                comment_id: comment.id,
                removed: removed.clone(),
            },
        )
        .await;
    Ok(Json(removed))
}

pub async fn course_activities(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(course): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<Json<ActivityPage>, Error> {
    let course = access::check_course(
        &mut PostgresDb { conn: &mut *conn },
        user.id,
        CourseId(course),
        CourseAction::Read,
    )
    .await??;
    Ok(Json(
        db::list_course_activities(&mut *conn, course.id, &page).await?,
    ))
}

pub async fn recent_activities(
    Auth(user): Auth,
    mut conn: PgConn,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Activity>>, Error> {
    Ok(Json(
        db::recent_activities(&mut *conn, user.id, page.recent_limit()).await?,
    ))
}

pub async fn feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<RoomFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        feed_impl(write, read, db, feeds)
    }))
}

async fn authenticate(db: &PgPool, token: &str) -> Option<UserId> {
    let token = Uuid::try_parse(token).ok()?;
    let mut conn = db.acquire().await.ok()?;
    db::recover_session(&mut *conn, AuthToken(token))
        .await
        .ok()
        .map(|u| u.id)
}

pub async fn feed_impl<W, R>(mut write: W, mut read: R, db: PgPool, feeds: RoomFeeds)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    tracing::debug!("feed websocket connected");
    match read.next().await {
        Some(Ok(Message::Text(token))) => {
            if let Some(user) = authenticate(&db, &token).await {
                if write.send(Message::Text(String::from("ok"))).await.is_ok() {
                    tracing::debug!(?user, "feed websocket auth success");
                    feeds.add_connection(user, write, read, db).await;
                    return;
                }
            }
            tracing::debug!(?token, "feed websocket auth failure");
        }
        msg => tracing::debug!(?msg, "feed websocket sent no auth token"),
    }
    let _ = write
        .send(Message::Text(String::from("permission denied")))
        .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;

    /// Runs a feed socket whose client sends `first`, returning what the server answered
    async fn answer_to(first: Option<Result<Message, axum::Error>>) -> Vec<Message> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .expect("building lazy pool");
        let (to_server, read) = mpsc::unbounded();
        let (write, from_server) = mpsc::unbounded();
        if let Some(msg) = first {
            to_server.unbounded_send(msg).unwrap();
        }
        drop(to_server);
        tokio::time::timeout(
            Duration::from_secs(5),
            feed_impl(write, read, PgPool::new(pool), RoomFeeds::new()),
        )
        .await
        .expect("feed socket did not give up");
        from_server.collect().await
    }

    fn denied() -> Vec<Message> {
        vec![Message::Text(String::from("permission denied"))]
    }

    #[tokio::test]
    async fn feeds_want_a_text_token_first() {
        assert_eq!(
            answer_to(Some(Ok(Message::Binary(b"token".to_vec())))).await,
            denied()
        );
        assert_eq!(answer_to(Some(Ok(Message::Ping(Vec::new())))).await, denied());
        assert_eq!(answer_to(None).await, denied());
        assert_eq!(
            answer_to(Some(Ok(Message::Text(String::from("not a token"))))).await,
            denied()
        );
    }
}
