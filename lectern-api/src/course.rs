use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{Error, Pagination, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CourseId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Course {
    pub id: CourseId,
    pub instructor_id: UserId,
    pub title: String,
    pub description: String,
    pub published: bool,
    pub category: Category,
    pub level: Level,
    pub students: BTreeSet<UserId>,
    pub created_at: Time,
    pub updated_at: Time,
}

impl Course {
    pub fn is_instructor(&self, user: UserId) -> bool {
        self.instructor_id == user
    }

    pub fn is_enrolled(&self, user: UserId) -> bool {
        self.students.contains(&user)
    }
}

#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
pub enum Category {
    WebDevelopment,
    DataScience,
    MobileDevelopment,
    Design,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::WebDevelopment,
        Category::DataScience,
        Category::MobileDevelopment,
        Category::Design,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::WebDevelopment => "web_development",
            Category::DataScience => "data_science",
            Category::MobileDevelopment => "mobile_development",
            Category::Design => "design",
            Category::Other => "other",
        }
    }

    pub fn from_db(s: &str) -> anyhow::Result<Category> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown course category {s:?}"))
    }
}

#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
pub enum Level {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Beginner, Level::Intermediate, Level::Advanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
        }
    }

    pub fn from_db(s: &str) -> anyhow::Result<Level> {
        Level::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown course level {s:?}"))
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewCourse {
    pub id: CourseId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub level: Level,
}

impl NewCourse {
    /// Returns the trimmed title and description
    pub fn validate(&self) -> Result<(String, String), Error> {
        let title = crate::validate_required("title", &self.title)?;
        let description = crate::validate_required("description", &self.description)?;
        Ok((String::from(title), String::from(description)))
    }

    /// Builds the course as it will be stored, assuming it has been validated
    pub fn into_course(self, instructor_id: UserId, now: Time) -> Course {
        Course {
            id: self.id,
            instructor_id,
            title: String::from(self.title.trim()),
            description: String::from(self.description.trim()),
            published: false,
            category: self.category,
            level: self.level,
            students: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update, `None` fields are left untouched
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<bool>,
    pub category: Option<Category>,
    pub level: Option<Level>,
}

impl CourseUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(t) = &self.title {
            crate::validate_required("title", t)?;
        }
        if let Some(d) = &self.description {
            crate::validate_required("description", d)?;
        }
        Ok(())
    }

    pub fn apply(&self, course: &mut Course, now: Time) {
        if let Some(t) = &self.title {
            course.title = String::from(t.trim());
        }
        if let Some(d) = &self.description {
            course.description = String::from(d.trim());
        }
        if let Some(p) = self.published {
            course.published = p;
        }
        if let Some(c) = self.category {
            course.category = c;
        }
        if let Some(l) = self.level {
            course.level = l;
        }
        course.updated_at = now;
    }
}

pub const DEFAULT_COURSE_LIMIT: u64 = 10;

/// Query parameters of the course catalog
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct CourseQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub category: Option<Category>,
    pub level: Option<Level>,

    /// Matched against the title and the description, ignoring ASCII case
    pub search: Option<String>,
}

impl CourseQuery {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(s) = &self.search {
            crate::validate_string(s)?;
        }
        Ok(())
    }

    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: Some(self.limit.unwrap_or(DEFAULT_COURSE_LIMIT)),
        }
    }

    /// The search term, if it is not blank
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches(&self, course: &Course) -> bool {
        let contains = |haystack: &str, needle: &str| {
            haystack
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase())
        };
        self.category.map_or(true, |c| course.category == c)
            && self.level.map_or(true, |l| course.level == l)
            && self.search().map_or(true, |s| {
                contains(&course.title, s) || contains(&course.description, s)
            })
    }

    pub fn page_of(&self, courses: Vec<Course>, total: u64) -> CoursePage {
        let pagination = self.pagination();
        CoursePage {
            courses,
            total,
            total_pages: pagination.total_pages(total),
            current_page: pagination.page(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoursePage {
    pub courses: Vec<Course>,
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u64,
}
