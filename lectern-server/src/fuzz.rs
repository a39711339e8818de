#![cfg(test)]

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use lectern_api::{
    Activity, ActivityId, ActivityPage, Category, Comment, CommentId, Course, CourseId,
    CoursePage, CourseProgress, CourseQuery, CourseUpdate, EditComment, Error as ApiError, Lesson,
    LessonId, LessonOrder, Level, NewComment, NewCourse, NewLesson, NewSession, NewUser,
    Pagination, Role, ThreadedComment, Time, User, UserId, Uuid, STUB_UUID,
};
use lectern_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

/// Picks the most recent postgres found in PATH, if any
fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut best: Option<(postgresfixture::runtime::Runtime, _)> = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            let better = match &best {
                None => true,
                Some((_, best_version)) => *best_version < v,
            };
            if better {
                best = Some((r, v));
            }
        }
    }
    let (runtime, _) = best?;
    Some(postgresfixture::cluster::Cluster::new(data, runtime))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = match build_pg_cluster(datadir_path) {
                Some(cluster) => cluster,
                None => {
                    eprintln!("postgresql is not installed in path, skipping {}", stringify!($name));
                    return;
                }
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path), 8).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::Executor::execute(&mut *conn, include_str!("../reset-test-db.sql"))
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        name: u8,
        instructor: bool,
    },
    Auth {
        uid: usize,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    ListCourses {
        sid: usize,
        page: Option<u8>,
        limit: Option<u8>,
        category: Option<u8>,
        level: Option<u8>,
        search: Option<u8>,
    },
    MyCourses {
        sid: usize,
    },
    EnrolledCourses {
        sid: usize,
    },
    CreateCourse {
        sid: usize,
        title: String,
        description: String,
        category: u8,
        level: u8,
    },
    UpdateCourse {
        sid: usize,
        cid: usize,
        title: Option<String>,
        published: Option<bool>,
        category: Option<u8>,
        level: Option<u8>,
    },
    DeleteCourse {
        sid: usize,
        cid: usize,
    },
    Enroll {
        sid: usize,
        cid: usize,
    },
    Unenroll {
        sid: usize,
        cid: usize,
    },
    ListLessons {
        sid: usize,
        cid: usize,
    },
    CreateLesson {
        sid: usize,
        cid: usize,
        title: String,
    },
    DeleteLesson {
        sid: usize,
        lid: usize,
    },
    ReorderLessons {
        sid: usize,
        cid: usize,
        shift: u8,
        reverse: bool,
        drop_last: bool,
    },
    CompleteLesson {
        sid: usize,
        lid: usize,
    },
    UncompleteLesson {
        sid: usize,
        lid: usize,
    },
    CourseProgress {
        sid: usize,
        cid: usize,
    },
    MyProgress {
        sid: usize,
    },
    ListComments {
        sid: usize,
        lid: usize,
    },
    AddComment {
        sid: usize,
        lid: usize,
        parent: Option<usize>,
        message: String,
    },
    EditComment {
        sid: usize,
        comid: usize,
        message: String,
    },
    DeleteComment {
        sid: usize,
        comid: usize,
    },
    CourseActivities {
        sid: usize,
        cid: usize,
        page: Option<u8>,
        limit: Option<u8>,
    },
    RecentActivities {
        sid: usize,
        limit: Option<u8>,
    },
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

/// Erases what legitimately differs between the app and the mock: the
/// timestamps, the server-generated ids and the order of unordered listings
trait Normalize {
    fn normalize(&mut self) {}

    /// Listings of items with a key are compared regardless of their order
    fn sort_key(&self) -> Option<Uuid> {
        None
    }
}

fn epoch() -> Time {
    Time::from(std::time::UNIX_EPOCH)
}

impl Normalize for () {}
impl Normalize for User {}

impl Normalize for CommentId {
    fn sort_key(&self) -> Option<Uuid> {
        Some(self.0)
    }
}

impl Normalize for Course {
    fn normalize(&mut self) {
        self.created_at = epoch();
        self.updated_at = epoch();
    }

    fn sort_key(&self) -> Option<Uuid> {
        Some(self.id.0)
    }
}

impl Normalize for Lesson {
    fn normalize(&mut self) {
        self.created_at = epoch();
        self.updated_at = epoch();
    }
}

impl Normalize for Comment {
    fn normalize(&mut self) {
        self.replies.sort();
        self.created_at = epoch();
        self.updated_at = epoch();
    }
}

impl Normalize for CoursePage {
    fn normalize(&mut self) {
        self.courses.normalize();
    }
}

impl Normalize for ThreadedComment {
    fn normalize(&mut self) {
        self.comment.normalize();
    }

    fn sort_key(&self) -> Option<Uuid> {
        Some(self.comment.id.0)
    }
}

impl Normalize for CourseProgress {
    fn sort_key(&self) -> Option<Uuid> {
        Some(self.course_id.0)
    }
}

impl Normalize for Activity {
    fn normalize(&mut self) {
        self.id = ActivityId(STUB_UUID);
        self.date = epoch();
    }
}

impl Normalize for ActivityPage {
    fn normalize(&mut self) {
        self.activities.normalize();
    }
}

impl<T: Normalize> Normalize for Vec<T> {
    fn normalize(&mut self) {
        for t in self.iter_mut() {
            t.normalize();
        }
        if self.iter().all(|t| t.sort_key().is_some()) {
            self.sort_by_key(|t| t.sort_key());
        }
    }
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq + Normalize,
{
    let normalize = |mut t: T| {
        t.normalize();
        t
    };
    assert_eq!(
        app_res.map(normalize),
        mock_res.map(normalize),
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

/// Picks one of `ids`, or a fresh id that exists nowhere
fn pick(ids: &[Uuid], fuzz_id: usize) -> Uuid {
    match resize_int(fuzz_id, ..ids.len()) {
        Some(i) => ids[i],
        None => Uuid::new_v4(),
    }
}

fn pick_category(n: u8) -> Category {
    Category::ALL[usize::from(n) % Category::ALL.len()]
}

fn pick_level(n: u8) -> Level {
    Level::ALL[usize::from(n) % Level::ALL.len()]
}

/// Search terms of the course catalog, in mixed case to exercise case folding
const SEARCH_TERMS: [&str; 5] = ["rust", "RuSt", "intro", "e", "zz"];

/// How `v` appears in a query string, for enums without data
fn query_value<T: serde::Serialize>(v: &T) -> String {
    match serde_json::to_value(v).expect("serializing query value") {
        serde_json::Value::String(s) => s,
        v => v.to_string(),
    }
}

const PASSWORD: &str = "password";

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    password_hash: String,
    sessions: Vec<Session>,
    courses: Vec<Uuid>,
    lessons: Vec<Uuid>,
    comments: Vec<Uuid>,
}

impl ComparativeFuzzer {
    async fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool, Some(AuthToken(admin_token))).await;
        ComparativeFuzzer {
            admin_token,
            app,
            mock: MockServer::new(),
            // minimal cost, this is only hashed once and checked on every login
            password_hash: bcrypt::hash(PASSWORD, 4).expect("hashing test password"),
            sessions: Vec::new(),
            courses: Vec::new(),
            lessons: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Returns the session picked by `sid`, logging someone in if there is none yet
    #[async_recursion]
    async fn session(&mut self, sid: usize) -> (Uuid, AuthToken) {
        match resize_int(sid, ..self.sessions.len()) {
            Some(i) => (self.sessions[i].app.0, self.sessions[i].mock),
            None => {
                self.execute_fuzz_op(FuzzOp::Auth { uid: sid }).await;
                self.session(sid).await
            }
        }
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { name, instructor } => {
                let new_user = NewUser {
                    id: UserId(Uuid::new_v4()),
                    name: format!("user{name}"),
                    role: match instructor {
                        true => Role::Instructor,
                        false => Role::Student,
                    },
                    initial_password_hash: self.password_hash.clone(),
                };
                compare(
                    "CreateUser",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/admin/create-user",
                        Some(self.admin_token),
                        &new_user,
                    )
                    .await,
                    self.mock
                        .admin_create_user(new_user, String::from(PASSWORD)),
                )
            }
            FuzzOp::Auth { uid } => {
                if let Some(uid) = resize_int(uid, ..self.mock.test_num_users()) {
                    let (user, password) = self.mock.test_get_user_info(uid);
                    let session = NewSession {
                        user: String::from(user),
                        password: String::from(password),
                        device: String::from("fuzzer"),
                    };
                    let app_tok =
                        run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                    let mock_tok = self.mock.auth(session);
                    if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                        self.sessions.push(Session { app, mock });
                    }
                    compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
                } else {
                    self.execute_fuzz_op(FuzzOp::CreateUser {
                        name: 0,
                        instructor: uid % 2 == 0,
                    })
                    .await;
                    self.execute_fuzz_op(FuzzOp::Auth { uid }).await;
                }
            }
            FuzzOp::Unauth { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "Unauth",
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(app), &()).await,
                    self.mock.unauth(mock),
                );
            }
            FuzzOp::Whoami { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "Whoami",
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(app), &()).await,
                    self.mock.whoami(mock),
                );
            }
            FuzzOp::ListCourses {
                sid,
                page,
                limit,
                category,
                level,
                search,
            } => {
                let (app, mock) = self.session(sid).await;
                let query = CourseQuery {
                    page: page.map(u64::from),
                    limit: limit.map(u64::from),
                    category: category.map(pick_category),
                    level: level.map(pick_level),
                    search: search
                        .map(|s| String::from(SEARCH_TERMS[usize::from(s) % SEARCH_TERMS.len()])),
                };
                let mut params = Vec::new();
                if let Some(p) = query.page {
                    params.push(format!("page={p}"));
                }
                if let Some(l) = query.limit {
                    params.push(format!("limit={l}"));
                }
                if let Some(c) = &query.category {
                    params.push(format!("category={}", query_value(c)));
                }
                if let Some(l) = &query.level {
                    params.push(format!("level={}", query_value(l)));
                }
                if let Some(s) = &query.search {
                    params.push(format!("search={s}"));
                }
                let uri = format!("/api/courses?{}", params.join("&"));
                compare(
                    "ListCourses",
                    run_on_app(&mut self.app, "GET", &uri, Some(app), &()).await,
                    self.mock.list_courses(mock, query),
                );
            }
            FuzzOp::MyCourses { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "MyCourses",
                    run_on_app(&mut self.app, "GET", "/api/my-courses", Some(app), &()).await,
                    self.mock.my_courses(mock),
                );
            }
            FuzzOp::EnrolledCourses { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "EnrolledCourses",
                    run_on_app(&mut self.app, "GET", "/api/enrolled-courses", Some(app), &())
                        .await,
                    self.mock.enrolled_courses(mock),
                );
            }
            FuzzOp::CreateCourse {
                sid,
                title,
                description,
                category,
                level,
            } => {
                let (app, mock) = self.session(sid).await;
                let course = NewCourse {
                    id: CourseId(Uuid::new_v4()),
                    title,
                    description,
                    category: pick_category(category),
                    level: pick_level(level),
                };
                let app_res: Result<Course, _> =
                    run_on_app(&mut self.app, "POST", "/api/courses", Some(app), &course).await;
                let mock_res = self.mock.create_course(mock, course.clone());
                if mock_res.is_ok() {
                    self.courses.push(course.id.0);
                }
                compare("CreateCourse", app_res, mock_res);
            }
            FuzzOp::UpdateCourse {
                sid,
                cid,
                title,
                published,
                category,
                level,
            } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                let update = CourseUpdate {
                    title,
                    description: None,
                    published,
                    category: category.map(pick_category),
                    level: level.map(pick_level),
                };
                compare(
                    "UpdateCourse",
                    run_on_app(
                        &mut self.app,
                        "PUT",
                        &format!("/api/courses/{course}"),
                        Some(app),
                        &update,
                    )
                    .await,
                    self.mock
                        .update_course(mock, CourseId(course), update.clone())
                        .await,
                );
            }
            FuzzOp::DeleteCourse { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                compare(
                    "DeleteCourse",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/courses/{course}"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.delete_course(mock, CourseId(course)).await,
                );
            }
            FuzzOp::Enroll { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                compare(
                    "Enroll",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/courses/{course}/enroll"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.enroll(mock, CourseId(course)),
                );
            }
            FuzzOp::Unenroll { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                compare(
                    "Unenroll",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/courses/{course}/unenroll"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.unenroll(mock, CourseId(course)),
                );
            }
            FuzzOp::ListLessons { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                compare(
                    "ListLessons",
                    run_on_app(
                        &mut self.app,
                        "GET",
                        &format!("/api/courses/{course}/lessons"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.list_lessons(mock, CourseId(course)).await,
                );
            }
            FuzzOp::CreateLesson { sid, cid, title } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                let lesson = NewLesson {
                    id: LessonId(Uuid::new_v4()),
                    title,
                    description: String::new(),
                };
                let app_res: Result<Lesson, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &format!("/api/courses/{course}/lessons"),
                    Some(app),
                    &lesson,
                )
                .await;
                let mock_res = self
                    .mock
                    .create_lesson(mock, CourseId(course), lesson.clone())
                    .await;
                if mock_res.is_ok() {
                    self.lessons.push(lesson.id.0);
                }
                compare("CreateLesson", app_res, mock_res);
            }
            FuzzOp::DeleteLesson { sid, lid } => {
                let (app, mock) = self.session(sid).await;
                let lesson = pick(&self.lessons, lid);
                compare(
                    "DeleteLesson",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/lessons/{lesson}"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.delete_lesson(mock, LessonId(lesson)).await,
                );
            }
            FuzzOp::ReorderLessons {
                sid,
                cid,
                shift,
                reverse,
                drop_last,
            } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                let mut lesson_ids = self
                    .mock
                    .test_db()
                    .lessons_of(CourseId(course))
                    .into_iter()
                    .map(|l| l.id)
                    .collect::<Vec<_>>();
                if !lesson_ids.is_empty() {
                    let len = lesson_ids.len();
                    lesson_ids.rotate_left(usize::from(shift) % len);
                }
                if reverse {
                    lesson_ids.reverse();
                }
                if drop_last {
                    lesson_ids.pop();
                }
                let order = LessonOrder { lesson_ids };
                compare(
                    "ReorderLessons",
                    run_on_app(
                        &mut self.app,
                        "PUT",
                        &format!("/api/courses/{course}/lessons/reorder"),
                        Some(app),
                        &order,
                    )
                    .await,
                    self.mock
                        .reorder_lessons(mock, CourseId(course), order.clone())
                        .await,
                );
            }
            FuzzOp::CompleteLesson { sid, lid } => {
                let (app, mock) = self.session(sid).await;
                let lesson = pick(&self.lessons, lid);
                compare(
                    "CompleteLesson",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/progress/lesson/{lesson}/complete"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.complete_lesson(mock, LessonId(lesson)).await,
                );
            }
            FuzzOp::UncompleteLesson { sid, lid } => {
                let (app, mock) = self.session(sid).await;
                let lesson = pick(&self.lessons, lid);
                compare(
                    "UncompleteLesson",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/progress/lesson/{lesson}/incomplete"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.uncomplete_lesson(mock, LessonId(lesson)).await,
                );
            }
            FuzzOp::CourseProgress { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                compare(
                    "CourseProgress",
                    run_on_app(
                        &mut self.app,
                        "GET",
                        &format!("/api/progress/course/{course}"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.course_progress(mock, CourseId(course)).await,
                );
            }
            FuzzOp::MyProgress { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "MyProgress",
                    run_on_app(&mut self.app, "GET", "/api/progress/mine", Some(app), &()).await,
                    self.mock.my_progress(mock),
                );
            }
            FuzzOp::ListComments { sid, lid } => {
                let (app, mock) = self.session(sid).await;
                let lesson = pick(&self.lessons, lid);
                compare(
                    "ListComments",
                    run_on_app(
                        &mut self.app,
                        "GET",
                        &format!("/api/lessons/{lesson}/comments"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.list_comments(mock, LessonId(lesson)).await,
                );
            }
            FuzzOp::AddComment {
                sid,
                lid,
                parent,
                message,
            } => {
                let (app, mock) = self.session(sid).await;
                let lesson = pick(&self.lessons, lid);
                let comment = NewComment {
                    id: CommentId(Uuid::new_v4()),
                    message,
                    parent_id: parent.map(|p| CommentId(pick(&self.comments, p))),
                };
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &format!("/api/lessons/{lesson}/comments"),
                    Some(app),
                    &comment,
                )
                .await;
                let mock_res = self
                    .mock
                    .add_comment(mock, LessonId(lesson), comment.clone())
                    .await;
                if mock_res.is_ok() {
                    self.comments.push(comment.id.0);
                }
                compare("AddComment", app_res, mock_res);
            }
            FuzzOp::EditComment {
                sid,
                comid,
                message,
            } => {
                let (app, mock) = self.session(sid).await;
                let comment = pick(&self.comments, comid);
                let edit = EditComment { message };
                compare(
                    "EditComment",
                    run_on_app(
                        &mut self.app,
                        "PUT",
                        &format!("/api/comments/{comment}"),
                        Some(app),
                        &edit,
                    )
                    .await,
                    self.mock
                        .edit_comment(mock, CommentId(comment), edit.clone())
                        .await,
                );
            }
            FuzzOp::DeleteComment { sid, comid } => {
                let (app, mock) = self.session(sid).await;
                let comment = pick(&self.comments, comid);
                compare(
                    "DeleteComment",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/comments/{comment}"),
                        Some(app),
                        &(),
                    )
                    .await,
                    self.mock.delete_comment(mock, CommentId(comment)).await,
                );
            }
            FuzzOp::CourseActivities {
                sid,
                cid,
                page,
                limit,
            } => {
                let (app, mock) = self.session(sid).await;
                let course = pick(&self.courses, cid);
                let pagination = Pagination {
                    page: page.map(u64::from),
                    limit: limit.map(u64::from),
                };
                let mut uri = format!("/api/courses/{course}/activities?");
                if let Some(p) = page {
                    uri += &format!("page={p}&");
                }
                if let Some(l) = limit {
                    uri += &format!("limit={l}");
                }
                compare(
                    "CourseActivities",
                    run_on_app(&mut self.app, "GET", &uri, Some(app), &()).await,
                    self.mock
                        .course_activities(mock, CourseId(course), pagination)
                        .await,
                );
            }
            FuzzOp::RecentActivities { sid, limit } => {
                let (app, mock) = self.session(sid).await;
                let uri = match limit {
                    Some(l) => format!("/api/activities/recent?limit={l}"),
                    None => String::from("/api/activities/recent"),
                };
                compare(
                    "RecentActivities",
                    run_on_app(&mut self.app, "GET", &uri, Some(app), &()).await,
                    self.mock.recent_activities(
                        mock,
                        Pagination {
                            page: None,
                            limit: limit.map(u64::from),
                        },
                    ),
                );
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
