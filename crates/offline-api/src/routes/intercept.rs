//! Intercepting proxy handler

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use offline_core::InterceptedRequest;
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

/// Response header naming where the answer came from
pub const CACHE_SOURCE_HEADER: &str = "x-cache";

/// Every request not claimed by another route goes through the cache
pub async fn intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let url = request_url(&state.origin, &uri)?;

    let outcome = state
        .executor
        .handle(InterceptedRequest {
            method,
            url,
            headers,
            body,
        })
        .await?;

    let mut response = outcome.response.map(Body::from).into_response();
    response.headers_mut().insert(
        CACHE_SOURCE_HEADER,
        HeaderValue::from_static(outcome.served_from.as_str()),
    );
    Ok(response)
}

/// Origin-form targets are always placed on the origin, so a path such as
/// `//other.host/x` can never change the authority. Absolute-form targets are
/// only accepted when they name the origin itself.
fn request_url(origin: &Url, uri: &Uri) -> Result<Url, ApiError> {
    if uri.scheme().is_some() {
        let url = Url::parse(&uri.to_string())
            .map_err(|e| ApiError::BadRequest(format!("invalid request URI {}: {}", uri, e)))?;
        if url.origin() != origin.origin() {
            return Err(ApiError::BadRequest(format!(
                "request target {} is not on {}",
                url,
                origin.origin().ascii_serialization()
            )));
        }
        return Ok(url);
    }

    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}
