use chrono::{Duration, Utc};
use lectern_api::{Activity, Category, Lesson, Level, NewUser, Role, Time, UserId};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_INSTRUCTORS: usize = 3;
const NUM_STUDENTS: usize = 20;
const PASSWORD: &str = "password";

const NUM_COURSES: usize = 6;
const STUDENTS_PER_COURSE: usize = 8;
const LESSONS_PER_COURSE: usize = 5;
const COMMENTS_PER_LESSON: usize = 15;

/// Odds that a comment replies to an earlier one rather than starting a thread
const REPLY_PROBABILITY: f64 = 0.6;

fn gen_n_items<T>(table: &str, items: &[T], mut f: impl FnMut(&T) -> String) {
    if items.is_empty() {
        return;
    }
    println!("INSERT INTO {} VALUES", table);
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(item));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn date(t: Time) -> String {
    quote(&t.to_rfc3339())
}

struct Comment {
    id: Uuid,
    lesson: Uuid,
    owner: UserId,
    parent: Option<Uuid>,
    message: String,
    date: Time,
}

fn main() -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let start = Utc::now() - Duration::days(30);

    // Every user shares the same password, hashed only once
    let template = NewUser::new(UserId::stub(), String::new(), Role::Student, PASSWORD)?;
    let users = (0..NUM_INSTRUCTORS + NUM_STUDENTS)
        .map(|i| match i < NUM_INSTRUCTORS {
            true => (UserId(Uuid::new_v4()), format!("instructor{i}"), Role::Instructor),
            false => (
                UserId(Uuid::new_v4()),
                format!("student{}", i - NUM_INSTRUCTORS),
                Role::Student,
            ),
        })
        .collect::<Vec<_>>();
    gen_n_items("users", &users, |(id, name, role)| {
        format!(
            "('{}', {}, {}, {})",
            id.0,
            quote(name),
            quote(&template.initial_password_hash),
            quote(role.as_str())
        )
    });
    let (instructors, students) = users.split_at(NUM_INSTRUCTORS);

    let courses = (0..NUM_COURSES)
        .map(|i| (Uuid::new_v4(), instructors[i % NUM_INSTRUCTORS].0))
        .collect::<Vec<_>>();
    let catalog = courses
        .iter()
        .map(|(id, instructor)| {
            let category = Category::ALL.choose(&mut rng).copied().unwrap_or_default();
            let level = Level::ALL.choose(&mut rng).copied().unwrap_or_default();
            (*id, *instructor, category, level)
        })
        .collect::<Vec<_>>();
    // category and level come last, having been added after the other columns
    gen_n_items("courses", &catalog, |(id, instructor, category, level)| {
        format!(
            "('{}', '{}', {}, {}, {}, {}, {}, {}, {})",
            id,
            instructor.0,
            quote(&lipsum::lipsum_title()),
            quote(&lipsum::lipsum_words(30)),
            rand::random::<bool>(),
            date(start),
            date(start),
            quote(category.as_str()),
            quote(level.as_str()),
        )
    });

    let mut enrollments = Vec::new();
    let mut activities = Vec::new();
    for (course, _) in courses.iter() {
        for (student, _, _) in students.choose_multiple(&mut rng, STUDENTS_PER_COURSE) {
            enrollments.push((*course, *student));
            activities.push(Activity::student_enrolled(
                *student,
                lectern_api::CourseId(*course),
            ));
        }
    }
    gen_n_items("enrollments", &enrollments, |(course, student)| {
        format!("('{}', '{}')", course, student.0)
    });

    let mut lessons = Vec::new();
    for (course, instructor) in courses.iter() {
        for position in 0..LESSONS_PER_COURSE {
            let lesson = Lesson {
                id: lectern_api::LessonId(Uuid::new_v4()),
                course_id: lectern_api::CourseId(*course),
                title: lipsum::lipsum_title(),
                description: lipsum::lipsum(40),
                position: position as i64,
                created_at: start + Duration::hours(position as i64),
                updated_at: start + Duration::hours(position as i64),
            };
            activities.push(Activity::lesson_added(*instructor, &lesson));
            lessons.push(lesson);
        }
    }
    gen_n_items("lessons", &lessons, |l| {
        format!(
            "('{}', '{}', {}, {}, {}, {}, {})",
            l.id.0,
            l.course_id.0,
            quote(&l.title),
            quote(&l.description),
            l.position,
            date(l.created_at),
            date(l.updated_at),
        )
    });

    // each student went through the first few lessons of their courses
    let mut completions = Vec::new();
    for (course, student) in enrollments.iter() {
        let done = rng.gen_range(0..=LESSONS_PER_COURSE);
        for (i, l) in lessons
            .iter()
            .filter(|l| l.course_id.0 == *course)
            .take(done)
            .enumerate()
        {
            let at = l.created_at + Duration::days(i as i64 + 1);
            completions.push((l.id, *student, *course, at));
        }
    }
    gen_n_items("lesson_completions", &completions, |(lesson, student, course, at)| {
        format!("('{}', '{}', '{}', {})", lesson.0, student.0, course, date(*at))
    });

    let mut comments = Vec::<Comment>::new();
    for lesson in lessons.iter() {
        let (_, instructor) = courses
            .iter()
            .find(|(c, _)| *c == lesson.course_id.0)
            .expect("lesson of unknown course");
        let members = enrollments
            .iter()
            .filter(|(c, _)| *c == lesson.course_id.0)
            .map(|(_, s)| *s)
            .chain(std::iter::once(*instructor))
            .collect::<Vec<_>>();
        let first = comments.len();
        for i in 0..COMMENTS_PER_LESSON {
            let parent = match i > 0 && rng.gen_bool(REPLY_PROBABILITY) {
                true => Some(comments[rng.gen_range(first..comments.len())].id),
                false => None,
            };
            comments.push(Comment {
                id: Uuid::new_v4(),
                lesson: lesson.id.0,
                owner: *members.choose(&mut rng).expect("course without members"),
                parent,
                message: lipsum::lipsum_words(rng.gen_range(3..40)),
                date: lesson.created_at + Duration::minutes(i as i64 * 7),
            });
        }
    }
    gen_n_items("comments", &comments, |c| {
        format!(
            "('{}', '{}', '{}', {}, {}, {}, {})",
            c.id,
            c.lesson,
            c.owner.0,
            quote(&c.message),
            c.parent
                .map(|p| format!("'{p}'"))
                .unwrap_or_else(|| String::from("NULL")),
            date(c.date),
            date(c.date),
        )
    });

    gen_n_items("activities", &activities, |a| {
        let (target_kind, target_id) = match a.target.map(|t| t.to_db()) {
            Some((kind, id)) => (quote(kind), format!("'{id}'")),
            None => (String::from("NULL"), String::from("NULL")),
        };
        format!(
            "('{}', '{}', '{}', {}, {}, {}, {}, {})",
            a.id.0,
            a.course_id.0,
            a.actor_id.0,
            quote(a.kind.as_str()),
            quote(&a.description),
            target_kind,
            target_id,
            date(a.date),
        )
    });

    Ok(())
}
