use std::collections::HashMap;

use chrono::Utc;
use lectern_api::{
    access::{self, CommentAction, CourseAction},
    thread, Activity, ActivityPage, AuthToken, Comment, CommentId, Course, CourseId,
    CoursePage, CourseProgress, CourseQuery, CourseUpdate, EditComment, Error, FeedMessage,
    Lesson, LessonId, LessonOrder, LessonUpdate, MemDb, NewComment, NewCourse, NewLesson,
    NewSession, NewUser, Pagination, Role, Room, ThreadedComment, User, UserId, Uuid,
};
use tokio::sync::mpsc;

/// The in-memory store cannot fail, so this only reports broken invariants
fn internal<E: std::fmt::Debug>(err: E) -> Error {
    Error::Unknown(format!("{err:?}"))
}

/// In-memory implementation of the whole HTTP API, used as a reference
/// for the real server
pub struct MockServer {
    db: MemDb,

    /// Plain-text passwords, so that tests can log users in
    passwords: HashMap<UserId, String>,

    sessions: HashMap<AuthToken, UserId>,
    feeds: HashMap<Room, Vec<(UserId, mpsc::UnboundedSender<FeedMessage>)>>,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            db: MemDb::new(),
            passwords: HashMap::new(),
            sessions: HashMap::new(),
            feeds: HashMap::new(),
        }
    }

    /// Return name & pass for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (&str, &str) {
        let u = self
            .db
            .users
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.db.users.len()));
        (&u.user.name, self.passwords[&u.user.id].as_str())
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.db.users.len()
    }

    /// Read-only access to the underlying store
    pub fn test_db(&self) -> &MemDb {
        &self.db
    }

    fn resolve(&self, tok: AuthToken) -> Result<User, Error> {
        let id = self.sessions.get(&tok).ok_or(Error::PermissionDenied)?;
        Ok(self.db.users[id].user.clone())
    }

    fn relay(&mut self, room: Room, msg: FeedMessage) {
        if let Some(feeds) = self.feeds.get_mut(&room) {
            feeds.retain(|(_, f)| f.send(msg.clone()).is_ok());
        }
    }

    /// Unsubscribes `user` from `room`, telling its feeds they left
    fn evict(&mut self, room: Room, user: UserId) {
        if let Some(feeds) = self.feeds.get_mut(&room) {
            feeds.retain(|(u, f)| {
                if *u != user {
                    return true;
                }
                let _ = f.send(FeedMessage::Left(room));
                false
            });
        }
    }

    /// Unsubscribes everyone from `room`
    fn close(&mut self, room: Room) {
        for (_, f) in self.feeds.remove(&room).unwrap_or_default() {
            let _ = f.send(FeedMessage::Left(room));
        }
    }

    fn lesson_rooms(&self, course: CourseId) -> Vec<Room> {
        self.db
            .lessons_of(course)
            .into_iter()
            .map(|l| Room::Lesson(l.id))
            .collect()
    }

    fn record_activity(&mut self, activity: Activity) {
        self.db.push_activity(activity.clone());
        self.relay(
            Room::Course(activity.course_id),
            FeedMessage::NewActivity(activity),
        );
    }

    pub fn admin_create_user(&mut self, u: NewUser, password: String) -> Result<(), Error> {
        u.validate()?;
        if self.db.users.contains_key(&u.id) {
            return Err(Error::UuidAlreadyUsed(u.id.0));
        }
        if self.db.user_by_name(&u.name).is_some() {
            return Err(Error::NameAlreadyUsed(u.name));
        }
        self.passwords.insert(u.id, password);
        self.db.insert_user(u.user(), u.initial_password_hash);
        Ok(())
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let user = match self.db.user_by_name(&s.user) {
            Some(u) if s.verify_password(&u.password_hash) => u.user.id,
            _ => return Err(Error::PermissionDenied),
        };
        let tok = AuthToken(Uuid::new_v4());
        self.sessions.insert(tok, user);
        Ok(tok)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        self.sessions
            .remove(&tok)
            .map(|_| ())
            .ok_or(Error::PermissionDenied)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<User, Error> {
        self.resolve(tok)
    }

    pub fn list_courses(&self, tok: AuthToken, query: CourseQuery) -> Result<CoursePage, Error> {
        self.resolve(tok)?;
        query.validate()?;
        Ok(self.db.list_courses(&query))
    }

    /// The courses taught by the calling instructor, newest first
    pub fn my_courses(&self, tok: AuthToken) -> Result<Vec<Course>, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Instructor {
            return Err(Error::PermissionDenied);
        }
        Ok(self.db.courses_where(|c| c.is_instructor(user.id)))
    }

    /// The courses the calling student is enrolled in, newest first
    pub fn enrolled_courses(&self, tok: AuthToken) -> Result<Vec<Course>, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Student {
            return Err(Error::PermissionDenied);
        }
        Ok(self.db.courses_where(|c| c.is_enrolled(user.id)))
    }

    pub fn create_course(&mut self, tok: AuthToken, c: NewCourse) -> Result<Course, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Instructor {
            return Err(Error::PermissionDenied);
        }
        c.validate()?;
        if self.db.courses.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        Ok(self.db.insert_course(user.id, c, Utc::now()))
    }

    pub fn fetch_course(&self, tok: AuthToken, course: CourseId) -> Result<Course, Error> {
        self.resolve(tok)?;
        self.db
            .courses
            .get(&course)
            .cloned()
            .ok_or(Error::NotFound(course.0))
    }

    pub async fn update_course(
        &mut self,
        tok: AuthToken,
        course: CourseId,
        update: CourseUpdate,
    ) -> Result<Course, Error> {
        let user = self.resolve(tok)?;
        update.validate()?;
        let mut course = access::check_course(&mut self.db, user.id, course, CourseAction::Manage)
            .await
            .map_err(internal)??;
        update.apply(&mut course, Utc::now());
        self.db.courses.insert(course.id, course.clone());
        self.record_activity(Activity::course_updated(user.id, course.id));
        Ok(course)
    }

    pub async fn delete_course(&mut self, tok: AuthToken, course: CourseId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        access::check_course(&mut self.db, user.id, course, CourseAction::Manage)
            .await
            .map_err(internal)??;
        for room in self.lesson_rooms(course) {
            self.close(room);
        }
        self.close(Room::Course(course));
        self.db.remove_course(course);
        Ok(())
    }

    pub fn enroll(&mut self, tok: AuthToken, course: CourseId) -> Result<Course, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Student {
            return Err(Error::PermissionDenied);
        }
        if !self.db.courses.contains_key(&course) {
            return Err(Error::NotFound(course.0));
        }
        if !self.db.enroll(course, user.id) {
            return Err(Error::AlreadyEnrolled(course.0));
        }
        self.record_activity(Activity::student_enrolled(user.id, course));
        Ok(self.db.courses[&course].clone())
    }

    pub fn unenroll(&mut self, tok: AuthToken, course: CourseId) -> Result<Course, Error> {
        let user = self.resolve(tok)?;
        if !self.db.courses.contains_key(&course) {
            return Err(Error::NotFound(course.0));
        }
        if !self.db.unenroll(course, user.id) {
            return Err(Error::NotEnrolled(course.0));
        }
        self.record_activity(Activity::student_unenrolled(user.id, course));
        for room in self.lesson_rooms(course) {
            self.evict(room, user.id);
        }
        self.evict(Room::Course(course), user.id);
        Ok(self.db.courses[&course].clone())
    }

    pub async fn list_lessons(
        &mut self,
        tok: AuthToken,
        course: CourseId,
    ) -> Result<Vec<Lesson>, Error> {
        let user = self.resolve(tok)?;
        access::check_course(&mut self.db, user.id, course, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok(self.db.lessons_of(course))
    }

    pub async fn create_lesson(
        &mut self,
        tok: AuthToken,
        course: CourseId,
        l: NewLesson,
    ) -> Result<Lesson, Error> {
        let user = self.resolve(tok)?;
        l.validate()?;
        access::check_course(&mut self.db, user.id, course, CourseAction::Manage)
            .await
            .map_err(internal)??;
        if self.db.lessons.contains_key(&l.id) {
            return Err(Error::UuidAlreadyUsed(l.id.0));
        }
        let lesson = self.db.insert_lesson(course, l, Utc::now());
        self.record_activity(Activity::lesson_added(user.id, &lesson));
        Ok(lesson)
    }

    pub async fn fetch_lesson(&mut self, tok: AuthToken, lesson: LessonId) -> Result<Lesson, Error> {
        let user = self.resolve(tok)?;
        let (lesson, _) = access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok(lesson)
    }

    pub async fn update_lesson(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
        update: LessonUpdate,
    ) -> Result<Lesson, Error> {
        let user = self.resolve(tok)?;
        update.validate()?;
        let (mut lesson, _) =
            access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Manage)
                .await
                .map_err(internal)??;
        update.apply(&mut lesson, Utc::now());
        self.db.lessons.insert(lesson.id, lesson.clone());
        self.record_activity(Activity::lesson_updated(user.id, &lesson));
        Ok(lesson)
    }

    pub async fn delete_lesson(&mut self, tok: AuthToken, lesson: LessonId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let (lesson, _) = access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Manage)
            .await
            .map_err(internal)??;
        self.db.remove_lesson(lesson.id);
        self.record_activity(Activity::lesson_deleted(user.id, &lesson));
        self.close(Room::Lesson(lesson.id));
        Ok(())
    }

    pub async fn reorder_lessons(
        &mut self,
        tok: AuthToken,
        course: CourseId,
        order: LessonOrder,
    ) -> Result<Vec<Lesson>, Error> {
        let user = self.resolve(tok)?;
        access::check_course(&mut self.db, user.id, course, CourseAction::Manage)
            .await
            .map_err(internal)??;
        let lessons = order.apply(course, self.db.lessons_of(course), Utc::now())?;
        self.db.update_lessons(&lessons);
        Ok(lessons)
    }

    async fn student_lesson(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
    ) -> Result<(UserId, Lesson), Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Student {
            return Err(Error::PermissionDenied);
        }
        let (lesson, _) = access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok((user.id, lesson))
    }

    pub async fn complete_lesson(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
    ) -> Result<CourseProgress, Error> {
        let (student, lesson) = self.student_lesson(tok, lesson).await?;
        self.db.complete_lesson(student, lesson.id, Utc::now());
        Ok(self.db.progress(lesson.course_id, student))
    }

    pub async fn uncomplete_lesson(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
    ) -> Result<CourseProgress, Error> {
        let (student, lesson) = self.student_lesson(tok, lesson).await?;
        self.db.uncomplete_lesson(student, lesson.id);
        Ok(self.db.progress(lesson.course_id, student))
    }

    pub async fn course_progress(
        &mut self,
        tok: AuthToken,
        course: CourseId,
    ) -> Result<CourseProgress, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Student {
            return Err(Error::PermissionDenied);
        }
        access::check_course(&mut self.db, user.id, course, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok(self.db.progress(course, user.id))
    }

    /// Progress in every course the calling student is enrolled in, newest course first
    pub fn my_progress(&self, tok: AuthToken) -> Result<Vec<CourseProgress>, Error> {
        let user = self.resolve(tok)?;
        if user.role != Role::Student {
            return Err(Error::PermissionDenied);
        }
        Ok(self
            .db
            .courses_where(|c| c.is_enrolled(user.id))
            .into_iter()
            .map(|c| self.db.progress(c.id, user.id))
            .collect())
    }

    pub async fn list_comments(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
    ) -> Result<Vec<ThreadedComment>, Error> {
        let user = self.resolve(tok)?;
        access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok(ThreadedComment::build(self.db.comments_of(lesson)))
    }

    pub async fn add_comment(
        &mut self,
        tok: AuthToken,
        lesson: LessonId,
        c: NewComment,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        c.validate()?;
        access::check_lesson(&mut self.db, user.id, lesson, CourseAction::Comment)
            .await
            .map_err(internal)??;
        if let Some(parent) = c.parent_id {
            let parent = self
                .db
                .comments
                .get(&parent)
                .ok_or(Error::NotFound(parent.0))?;
            if parent.lesson_id != lesson {
                return Err(Error::InvalidParent(parent.id.0));
            }
        }
        if self.db.comments.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let comment = c.into_comment(lesson, user.id, Utc::now());
        self.db.insert_comment(comment.clone());
        self.relay(Room::Lesson(lesson), FeedMessage::NewComment(comment.clone()));
        Ok(comment)
    }

    pub async fn edit_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
        edit: EditComment,
    ) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        let message = edit.validate()?;
        access::check_comment(&mut self.db, user.id, comment, CommentAction::Edit)
            .await
            .map_err(internal)??;
        let stored = self
            .db
            .comments
            .get_mut(&comment)
            .ok_or(Error::NotFound(comment.0))?;
        stored.message = message;
        stored.updated_at = Utc::now();
        let comment = stored.clone();
        self.relay(
            Room::Lesson(comment.lesson_id),
            FeedMessage::UpdateComment(comment.clone()),
        );
        Ok(comment)
    }

    pub async fn delete_comment(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
    ) -> Result<Vec<CommentId>, Error> {
        let user = self.resolve(tok)?;
        let (comment, _) =
            access::check_comment(&mut self.db, user.id, comment, CommentAction::Delete)
                .await
                .map_err(internal)??;
        let removed = thread::delete_thread(&mut self.db, comment.id)
            .await
            .map_err(internal)?;
        self.relay(
            Room::Lesson(comment.lesson_id),
            FeedMessage::DeleteComment {
                lesson_id: comment.lesson_id,
                comment_id: comment.id,
                removed: removed.clone(),
            },
        );
        Ok(removed)
    }

    pub async fn course_activities(
        &mut self,
        tok: AuthToken,
        course: CourseId,
        page: Pagination,
    ) -> Result<ActivityPage, Error> {
        let user = self.resolve(tok)?;
        access::check_course(&mut self.db, user.id, course, CourseAction::Read)
            .await
            .map_err(internal)??;
        Ok(page.paginate(self.db.activities_of(|a| a.course_id == course)))
    }

    pub fn recent_activities(
        &self,
        tok: AuthToken,
        page: Pagination,
    ) -> Result<Vec<Activity>, Error> {
        let user = self.resolve(tok)?;
        let courses = &self.db.courses;
        let mut res = self.db.activities_of(|a| {
            courses
                .get(&a.course_id)
                .map(|c| c.is_instructor(user.id) || c.is_enrolled(user.id))
                .unwrap_or(false)
        });
        res.truncate(page.recent_limit() as usize);
        Ok(res)
    }

    /// Subscribes to `room`, as a feed socket joining it would
    pub async fn join(
        &mut self,
        tok: AuthToken,
        room: Room,
    ) -> Result<mpsc::UnboundedReceiver<FeedMessage>, Error> {
        let user = self.resolve(tok)?;
        let allowed = access::may_join(&mut self.db, user.id, room)
            .await
            .map_err(internal)?;
        if !allowed {
            return Err(Error::PermissionDenied);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds
            .entry(room)
            .or_insert_with(Vec::new)
            .push((user.id, sender));
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use lectern_api::{Category, Level};

    use super::*;

    const PASSWORD: &str = "hunter2";

    struct Class {
        mock: MockServer,
        instructor: AuthToken,
        alice: AuthToken,
        bob: AuthToken,
        course: CourseId,
        lesson: LessonId,
    }

    fn login(mock: &mut MockServer, name: &str, role: Role) -> AuthToken {
        let user = NewUser::new(UserId(Uuid::new_v4()), String::from(name), role, PASSWORD)
            .expect("hashing password");
        mock.admin_create_user(user, String::from(PASSWORD))
            .expect("creating user");
        mock.auth(NewSession {
            user: String::from(name),
            password: String::from(PASSWORD),
            device: String::from("test"),
        })
        .expect("logging in")
    }

    async fn class() -> Class {
        let mut mock = MockServer::new();
        let instructor = login(&mut mock, "ada", Role::Instructor);
        let alice = login(&mut mock, "alice", Role::Student);
        let bob = login(&mut mock, "bob", Role::Student);
        let course = CourseId(Uuid::new_v4());
        mock.create_course(
            instructor,
            NewCourse {
                id: course,
                title: String::from("Compilers"),
                description: String::from("Parsing and beyond"),
                category: Category::Other,
                level: Level::Advanced,
            },
        )
        .unwrap();
        mock.enroll(alice, course).unwrap();
        mock.enroll(bob, course).unwrap();
        let lesson = LessonId(Uuid::new_v4());
        mock.create_lesson(
            instructor,
            course,
            NewLesson {
                id: lesson,
                title: String::from("Lexing"),
                description: String::new(),
            },
        )
        .await
        .unwrap();
        Class {
            mock,
            instructor,
            alice,
            bob,
            course,
            lesson,
        }
    }

    impl Class {
        async fn post(&mut self, tok: AuthToken, parent: Option<CommentId>) -> CommentId {
            self.mock
                .add_comment(
                    tok,
                    self.lesson,
                    NewComment {
                        id: CommentId(Uuid::new_v4()),
                        message: String::from("question"),
                        parent_id: parent,
                    },
                )
                .await
                .unwrap()
                .id
        }
    }

    #[tokio::test]
    async fn author_deletes_whole_thread() {
        let mut c = class().await;
        let a = c.post(c.alice, None).await;
        let b = c.post(c.bob, Some(a)).await;
        let cc = c.post(c.instructor, Some(a)).await;
        let d = c.post(c.bob, Some(cc)).await;

        let mut removed = c.mock.delete_comment(c.alice, a).await.unwrap();
        assert_eq!(removed.len(), 4);
        removed.sort();
        let mut expected = vec![a, b, cc, d];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(c.mock.list_comments(c.bob, c.lesson).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn instructor_deletes_reply() {
        let mut c = class().await;
        let a = c.post(c.alice, None).await;
        let b = c.post(c.bob, Some(a)).await;
        let cc = c.post(c.bob, Some(a)).await;
        let d = c.post(c.alice, Some(cc)).await;

        assert_eq!(
            c.mock.delete_comment(c.instructor, cc).await.unwrap(),
            vec![d, cc]
        );
        let threads = c.mock.list_comments(c.alice, c.lesson).await.unwrap();
        assert_eq!(
            threads
                .iter()
                .map(|t| (t.comment.id, t.depth))
                .collect::<Vec<_>>(),
            vec![(a, 0), (b, 1)]
        );
        assert_eq!(threads[0].comment.replies, vec![b]);
    }

    #[tokio::test]
    async fn classmates_cannot_delete_or_edit() {
        let mut c = class().await;
        let a = c.post(c.alice, None).await;
        assert_eq!(
            c.mock.delete_comment(c.bob, a).await,
            Err(Error::PermissionDenied)
        );
        let edit = EditComment {
            message: String::from("edited"),
        };
        assert_eq!(
            c.mock.edit_comment(c.instructor, a, edit.clone()).await,
            Err(Error::PermissionDenied)
        );
        let edited = c.mock.edit_comment(c.alice, a, edit).await.unwrap();
        assert_eq!(edited.message, "edited");
        assert_eq!(c.mock.test_db().comments.len(), 1);
    }

    #[tokio::test]
    async fn missing_comment_is_not_found() {
        let mut c = class().await;
        let missing = Uuid::new_v4();
        assert_eq!(
            c.mock.delete_comment(c.alice, CommentId(missing)).await,
            Err(Error::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn replies_must_stay_on_their_lesson() {
        let mut c = class().await;
        let a = c.post(c.alice, None).await;
        let other = LessonId(Uuid::new_v4());
        c.mock
            .create_lesson(
                c.instructor,
                c.course,
                NewLesson {
                    id: other,
                    title: String::from("Parsing"),
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        let res = c
            .mock
            .add_comment(
                c.bob,
                other,
                NewComment {
                    id: CommentId(Uuid::new_v4()),
                    message: String::from("hi"),
                    parent_id: Some(a),
                },
            )
            .await;
        assert_eq!(res, Err(Error::InvalidParent(a.0)));
    }

    #[tokio::test]
    async fn feed_sees_comment_lifecycle() {
        let mut c = class().await;
        let mut feed = c.mock.join(c.bob, Room::Lesson(c.lesson)).await.unwrap();
        let a = c.post(c.alice, None).await;
        match feed.recv().await {
            Some(FeedMessage::NewComment(comm)) => assert_eq!(comm.id, a),
            m => panic!("unexpected feed message {m:?}"),
        }
        c.mock.delete_comment(c.alice, a).await.unwrap();
        assert_eq!(
            feed.recv().await,
            Some(FeedMessage::DeleteComment {
                lesson_id: c.lesson,
                comment_id: a,
                removed: vec![a],
            })
        );
    }

    #[tokio::test]
    async fn strangers_cannot_join() {
        let mut c = class().await;
        let eve = login(&mut c.mock, "eve", Role::Student);
        assert!(matches!(
            c.mock.join(eve, Room::Course(c.course)).await,
            Err(Error::PermissionDenied)
        ));
        assert!(matches!(
            c.mock.join(eve, Room::Lesson(c.lesson)).await,
            Err(Error::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn enrollment_records_activity() {
        let mut c = class().await;
        let mut feed = c
            .mock
            .join(c.instructor, Room::Course(c.course))
            .await
            .unwrap();
        let eve = login(&mut c.mock, "eve", Role::Student);
        c.mock.enroll(eve, c.course).unwrap();
        assert_eq!(
            c.mock.enroll(eve, c.course),
            Err(Error::AlreadyEnrolled(c.course.0))
        );
        match feed.recv().await {
            Some(FeedMessage::NewActivity(a)) => {
                assert_eq!(a.kind, lectern_api::ActivityKind::StudentEnrolled);
            }
            m => panic!("unexpected feed message {m:?}"),
        }

        let page = c
            .mock
            .course_activities(c.alice, c.course, Pagination::default())
            .await
            .unwrap();
        // alice, bob, lexing lesson, eve
        assert_eq!(page.total, 4);
        assert_eq!(page.activities[0].actor_id, c.mock.whoami(eve).unwrap().id);
        assert_eq!(
            c.mock
                .recent_activities(c.alice, Pagination::default())
                .unwrap()
                .len(),
            4
        );
        assert_eq!(
            c.mock.recent_activities(
                c.alice,
                Pagination {
                    page: None,
                    limit: Some(2)
                }
            )
            .unwrap()
            .len(),
            2
        );
    }

    #[tokio::test]
    async fn only_instructors_create_courses() {
        let mut c = class().await;
        let res = c.mock.create_course(
            c.alice,
            NewCourse {
                id: CourseId(Uuid::new_v4()),
                title: String::from("Mine"),
                description: String::from("Not allowed"),
                category: Category::Design,
                level: Level::Beginner,
            },
        );
        assert_eq!(res, Err(Error::PermissionDenied));
        let catalog = c.mock.list_courses(c.alice, CourseQuery::default()).unwrap();
        assert_eq!(catalog.total, 1);
        assert_eq!(catalog.courses[0].id, c.course);
        assert_eq!(c.mock.my_courses(c.alice), Err(Error::PermissionDenied));
        assert_eq!(c.mock.my_courses(c.instructor).unwrap().len(), 1);
        assert_eq!(c.mock.enrolled_courses(c.bob).unwrap()[0].id, c.course);
        assert_eq!(c.mock.enrolled_courses(c.instructor), Err(Error::PermissionDenied));
    }

    #[tokio::test]
    async fn progress_follows_completions() {
        let mut c = class().await;
        let second = LessonId(Uuid::new_v4());
        c.mock
            .create_lesson(
                c.instructor,
                c.course,
                NewLesson {
                    id: second,
                    title: String::from("Parsing"),
                    description: String::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            c.mock.complete_lesson(c.instructor, c.lesson).await,
            Err(Error::PermissionDenied)
        );
        let eve = login(&mut c.mock, "eve", Role::Student);
        assert_eq!(
            c.mock.complete_lesson(eve, c.lesson).await,
            Err(Error::PermissionDenied)
        );

        let progress = c.mock.complete_lesson(c.alice, second).await.unwrap();
        assert_eq!(progress.completed_lessons, vec![second]);
        assert_eq!(progress.completion_percentage, 50);
        let progress = c.mock.complete_lesson(c.alice, c.lesson).await.unwrap();
        assert_eq!(progress.completed_lessons, vec![c.lesson, second]);
        assert_eq!(progress.last_completed, Some(c.lesson));
        assert_eq!(progress.completion_percentage, 100);

        let progress = c.mock.uncomplete_lesson(c.alice, second).await.unwrap();
        assert_eq!(progress.completion_percentage, 50);
        assert_eq!(
            c.mock.uncomplete_lesson(c.alice, second).await.unwrap(),
            progress
        );
        assert_eq!(
            c.mock.course_progress(c.alice, c.course).await.unwrap(),
            progress
        );
        assert_eq!(c.mock.my_progress(c.alice).unwrap(), vec![progress]);
        assert_eq!(
            c.mock
                .course_progress(c.bob, c.course)
                .await
                .unwrap()
                .completion_percentage,
            0
        );
    }

    #[tokio::test]
    async fn instructors_reorder_lessons() {
        let mut c = class().await;
        let second = LessonId(Uuid::new_v4());
        c.mock
            .create_lesson(
                c.instructor,
                c.course,
                NewLesson {
                    id: second,
                    title: String::from("Parsing"),
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        let order = LessonOrder {
            lesson_ids: vec![second, c.lesson],
        };
        assert_eq!(
            c.mock.reorder_lessons(c.alice, c.course, order.clone()).await,
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            c.mock
                .reorder_lessons(
                    c.instructor,
                    c.course,
                    LessonOrder {
                        lesson_ids: vec![second],
                    }
                )
                .await,
            Err(Error::InvalidLessonOrder(c.course.0))
        );
        let lessons = c
            .mock
            .reorder_lessons(c.instructor, c.course, order)
            .await
            .unwrap();
        assert_eq!(
            lessons.iter().map(|l| (l.id, l.position)).collect::<Vec<_>>(),
            vec![(second, 0), (c.lesson, 1)]
        );
        assert_eq!(c.mock.list_lessons(c.bob, c.course).await.unwrap(), lessons);
    }

    #[tokio::test]
    async fn leaving_a_course_leaves_its_rooms() {
        let mut c = class().await;
        let mut alice_course = c.mock.join(c.alice, Room::Course(c.course)).await.unwrap();
        let mut alice_lesson = c.mock.join(c.alice, Room::Lesson(c.lesson)).await.unwrap();
        let mut bob_lesson = c.mock.join(c.bob, Room::Lesson(c.lesson)).await.unwrap();

        c.mock.unenroll(c.alice, c.course).unwrap();
        match alice_course.recv().await {
            Some(FeedMessage::NewActivity(a)) => {
                assert_eq!(a.kind, lectern_api::ActivityKind::StudentUnenrolled);
            }
            m => panic!("unexpected feed message {m:?}"),
        }
        assert_eq!(
            alice_course.recv().await,
            Some(FeedMessage::Left(Room::Course(c.course)))
        );
        assert_eq!(
            alice_lesson.recv().await,
            Some(FeedMessage::Left(Room::Lesson(c.lesson)))
        );

        c.post(c.bob, None).await;
        assert!(matches!(
            bob_lesson.recv().await,
            Some(FeedMessage::NewComment(_))
        ));
        assert!(alice_lesson.try_recv().is_err());

        c.mock.delete_lesson(c.instructor, c.lesson).await.unwrap();
        assert_eq!(
            bob_lesson.recv().await,
            Some(FeedMessage::Left(Room::Lesson(c.lesson)))
        );
        assert_eq!(bob_lesson.recv().await, None);
    }

    #[tokio::test]
    async fn deleting_a_course_closes_its_rooms() {
        let mut c = class().await;
        let mut course = c.mock.join(c.bob, Room::Course(c.course)).await.unwrap();
        let mut lesson = c.mock.join(c.bob, Room::Lesson(c.lesson)).await.unwrap();
        c.mock.delete_course(c.instructor, c.course).await.unwrap();
        assert_eq!(
            course.recv().await,
            Some(FeedMessage::Left(Room::Course(c.course)))
        );
        assert_eq!(course.recv().await, None);
        assert_eq!(
            lesson.recv().await,
            Some(FeedMessage::Left(Room::Lesson(c.lesson)))
        );
        assert_eq!(lesson.recv().await, None);
    }
}
