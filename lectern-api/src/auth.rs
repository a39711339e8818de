use uuid::Uuid;

use crate::{Error, STUB_UUID};

/// Cost used when hashing user passwords
pub const BCRYPT_COST: u32 = 10;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub user: String,
    pub password: String,
    pub device: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.user)?;
        crate::validate_string(&self.password)?;
        crate::validate_string(&self.device)?;
        Ok(())
    }

    /// Checks `self.password` against a stored bcrypt hash
    pub fn verify_password(&self, hash: &str) -> bool {
        bcrypt::verify(&self.password, hash).unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}
