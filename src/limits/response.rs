//! Rejection responses shared by the guards.

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
};
use hyper::ext::ReasonPhrase;

/// Build a plain-text rejection carrying `reason` as both the HTTP/1.1 reason
/// phrase and the body.
pub(crate) fn rejection(status: StatusCode, reason: String) -> Response<Body> {
    let phrase = ReasonPhrase::try_from(reason.clone()).ok();

    let mut response = Response::new(Body::from(reason));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Some(phrase) = phrase {
        response.extensions_mut().insert(phrase);
    }
    response
}
