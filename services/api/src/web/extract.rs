//! services/api/src/web/extract.rs
//!
//! Request extractors whose rejections go through `ApiError`, so malformed
//! bodies and path segments answer with 400 and an `{"error": ...}` body.

use crate::error::ApiError;
use axum::extract::{FromRequest, FromRequestParts};

/// `axum::Json` with the rejection mapped onto the error taxonomy.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Path` with the rejection mapped onto the error taxonomy.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);
