//! Standard API response types

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Helper for creating responses with status codes
pub struct Created<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self.0)).into_response()
    }
}

/// File sent as a download.
pub struct Attachment {
    filename: String,
    content_type: &'static str,
    bytes: Vec<u8>,
    extra_headers: Vec<(HeaderName, HeaderValue)>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.extra_headers.push((name, value));
        self
    }
}

impl IntoResponse for Attachment {
    fn into_response(self) -> Response {
        // Filenames are sanitized upstream; quotes would still break the header.
        let disposition = format!("attachment; filename=\"{}\"", self.filename.replace('"', ""));
        let mut response = (
            [(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type))],
            self.bytes,
        )
            .into_response();

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        for (name, value) in self.extra_headers {
            headers.insert(name, value);
        }
        response
    }
}
