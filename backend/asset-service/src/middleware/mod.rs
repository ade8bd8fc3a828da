/// Request extractors
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the authenticated caller, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from the `X-User-Id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub Uuid);

impl FromRequest for OwnerId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(extract_owner_id(req))
    }
}

fn extract_owner_id(req: &HttpRequest) -> Result<OwnerId, AppError> {
    let header_value = req
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized("Missing x-user-id header".into()))?;

    let value = header_value
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid x-user-id header".into()))?;

    Uuid::parse_str(value.trim())
        .map(OwnerId)
        .map_err(|_| AppError::Unauthorized("Invalid x-user-id header value".into()))
}
