//! Render management API: uniform call results and the HTTP client.

pub mod client;

pub use client::{
    ApiError, ApiErrorKind, ApiResult, ManagementApi, NewService, RenderClient, MAX_LOG_LINES,
    MAX_PAGE_SIZE, VALID_SERVICE_TYPES,
};
