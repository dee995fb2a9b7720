//! Caller identity. Authentication happens upstream; requests arrive with
//! the verified user id and role in headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Staff,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role == Role::Staff
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden("staff role required".to_string()))
        }
    }

    /// Customers may only act on their own records; staff on any.
    pub fn require_owner(&self, owner: Uuid) -> Result<(), AppError> {
        if self.is_staff() || self.user_id == owner {
            Ok(())
        } else {
            Err(AppError::Forbidden("record belongs to another user".to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError(format!("missing {USER_ID_HEADER} header")))?
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<Uuid>().ok())
            .ok_or_else(|| AppError::AuthError(format!("{USER_ID_HEADER} is not a valid id")))?;

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
        {
            None | Some("customer") => Role::Customer,
            Some("staff") => Role::Staff,
            Some(other) => {
                return Err(AppError::AuthError(format!("unknown role '{other}'")));
            }
        };

        Ok(AuthUser { user_id, role })
    }
}
