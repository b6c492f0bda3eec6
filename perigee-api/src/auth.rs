use uuid::Uuid;

use crate::{Error, UserId, STUB_UUID};

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
    pub user: String,
    #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
    pub password: String,
    #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
    pub device: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.user)?;
        crate::validate_string(&self.password)?;
        crate::validate_string(&self.device)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    #[generator(bolero::generator::gen_with::<String>().len(0..100usize))]
    pub name: String,
    #[generator(bolero::generator::gen_with::<String>().len(1..100usize))]
    pub initial_password_hash: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.name)?;
        crate::validate_string(&self.initial_password_hash)?;
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_alphanumeric() || "-_.".contains(c))
        {
            return Err(Error::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}
