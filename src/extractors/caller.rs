//! Extract the authenticated caller from the request (set upstream as `X-User-Id`).

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the caller's user id. Default: `X-User-Id`.
pub const CALLER_ID_HEADER: &str = "X-User-Id";

/// Optional caller id; absent or blank headers yield `None`.
#[derive(Clone, Debug)]
pub struct CallerId(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(CallerId(value))
    }
}
