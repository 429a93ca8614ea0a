//! Caller identity. The auth provider sits in front of the API and forwards the
//! verified user id; handlers only ever see an owner id.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const PROFILE_COMPLETE_HEADER: &str = "x-profile-complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub owner_id: Uuid,
    pub profile_complete: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AppError::Unauthorized)?;

        let profile_complete = parts
            .headers
            .get(PROFILE_COMPLETE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1");

        Ok(AuthUser {
            owner_id,
            profile_complete,
        })
    }
}

/// GET /api/v1/me
pub async fn handle_me(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<AuthUser, AppError> {
        let (mut parts, _) = req.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let req = Request::builder().body(()).unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_malformed_id_is_unauthorized() {
        let req = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_reads_owner_and_profile_flag() {
        let id = Uuid::new_v4();
        let req = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .header(PROFILE_COMPLETE_HEADER, "true")
            .body(())
            .unwrap();
        let user = extract(req).await.unwrap();
        assert_eq!(user.owner_id, id);
        assert!(user.profile_complete);
    }

    #[tokio::test]
    async fn test_profile_flag_defaults_to_incomplete() {
        let req = Request::builder()
            .header(USER_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        assert!(!extract(req).await.unwrap().profile_complete);
    }
}
