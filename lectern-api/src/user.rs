use anyhow::Context;
use uuid::Uuid;

use crate::{Error, BCRYPT_COST, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
        }
    }

    pub fn from_db(s: &str) -> anyhow::Result<Role> {
        match s {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            _ => Err(anyhow::anyhow!("unknown role {s:?}")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub initial_password_hash: String,
}

impl NewUser {
    pub fn new(id: UserId, name: String, role: Role, password: &str) -> anyhow::Result<NewUser> {
        Ok(NewUser {
            id,
            name,
            role,
            initial_password_hash: bcrypt::hash(password, BCRYPT_COST)
                .context("hashing initial password")?,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)?;
        crate::validate_string(&self.initial_password_hash)?;
        Ok(())
    }

    pub fn user(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            role: self.role,
        }
    }
}
