//! Request/response plumbing shared by every route handler.
//!
//! Grounded on the teacher's `http::helpers` (`parse_body`/`parse_param`/
//! `serialize_response`, referenced but not shipped in the retrieval pack).

use hyper::{Body, Request, Response};
use routerify::ext::RequestExt;
use routerify_query::RequestQueryExt;
use serde::{de::DeserializeOwned, Serialize};

use super::error::Error;

pub async fn parse_body<T: DeserializeOwned>(req: &mut Request<Body>) -> Result<T, Error> {
    let bytes = hyper::body::to_bytes(req.body_mut())
        .await
        .map_err(|e| Error::BadBody(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::BadBody(e.to_string()))
}

pub fn param<'r>(req: &'r Request<Body>, name: &str) -> Result<&'r str, Error> {
    req.param(name)
        .map(|s| s.as_str())
        .ok_or_else(|| Error::BadParam(name.to_string()))
}

/// A catch-all route param (registered as `*name`) is percent-decoded but
/// otherwise raw; resource/metadata uris are reassembled from it by
/// prefixing a leading slash.
pub fn wildcard_uri(req: &Request<Body>, name: &str) -> Result<gateway_core::model::Uri, Error> {
    let raw = param(req, name)?;
    Ok(gateway_core::model::Uri::from(format!("/{raw}")))
}

pub fn query_param(req: &Request<Body>, name: &str) -> Option<String> {
    req.query(name).cloned()
}

pub fn serialize_response<T: Serialize>(body: T) -> Result<Response<Body>, Error> {
    let json = serde_json::to_vec(&body).map_err(|e| Error::BadBody(e.to_string()))?;
    Ok(Response::builder()
        .header("content-type", "application/json")
        .body(Body::from(json))
        .expect("building a response from a fixed set of valid parts cannot fail"))
}
