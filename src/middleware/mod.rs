use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::models::PatronId;

pub const PATRON_HEADER: &str = "x-patron-id";

/// Patron identity resolved by the authentication layer in front of us and
/// forwarded as a header. Whether the patron exists is checked by the
/// purchase flow, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patron(pub PatronId);

impl<S> FromRequestParts<S> for Patron
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PATRON_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let id: i64 = raw.trim().parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
        if id <= 0 {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Patron(PatronId::new(id)))
    }
}
