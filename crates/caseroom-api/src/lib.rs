#![forbid(unsafe_code)]

pub const CRATE_NAME: &str = "caseroom-api";
pub const API_VERSION: &str = "v1";

pub mod dto;
pub mod error_mapping;
pub mod errors;
pub mod wire;

pub use error_mapping::{map_error, ApiErrorMapping};
pub use errors::{ApiError, ApiErrorCode};
