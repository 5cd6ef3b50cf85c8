//! JSON Schema generation for the wire types (spec §6 ambient tooling).
//!
//! Grounded on the teacher's `http::openapi::schema_fn` (a generic handler
//! returning `schemars::schema_for!(T)`); the teacher's full
//! `OpenApiGenerator`/`okapi` document builder isn't reproduced here since
//! this surface has no route-introspection counterpart to drive it from.

use gateway_core::model::{Device, Endpoint, Resource};
use hyper::{Body, Request, Response};
use schemars::{schema_for, JsonSchema};

use super::error::{Error, FormattedError};
use super::helpers::serialize_response;

pub async fn schema_fn<T: JsonSchema>(_req: Request<Body>) -> Result<Response<Body>, Error> {
    serialize_response(schema_for!(T))
}

pub async fn device_schema(req: Request<Body>) -> Result<Response<Body>, Error> {
    schema_fn::<Device>(req).await
}

pub async fn endpoint_schema(req: Request<Body>) -> Result<Response<Body>, Error> {
    schema_fn::<Endpoint>(req).await
}

pub async fn resource_schema(req: Request<Body>) -> Result<Response<Body>, Error> {
    schema_fn::<Resource>(req).await
}

pub async fn error_schema(req: Request<Body>) -> Result<Response<Body>, Error> {
    schema_fn::<FormattedError>(req).await
}
