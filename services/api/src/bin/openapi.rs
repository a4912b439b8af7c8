//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the ruleset chat API to `openapi.json`, or to
//! the path given as the first argument.

use api_lib::{error::ApiError, web::rest::ApiDoc};
use std::path::PathBuf;

fn main() -> Result<(), ApiError> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi.json"));
    std::fs::write(&path, ApiDoc::pretty_json()?)?;
    println!("OpenAPI document written to {}", path.display());
    Ok(())
}
