//! Buffered HTTP response with cache provenance.

use std::collections::HashMap;

use bytes::Bytes;
use http::{StatusCode, Version};

/// Where a resolved response came from.
///
/// Every successful response carries exactly one of these markers so
/// callers can tell provenance without the payload being altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheStatus {
    /// Freshly fetched from the transport during this request.
    #[default]
    Fresh,
    /// Served from an unexpired cache entry.
    Cached,
    /// Served from an expired entry while a background refresh runs.
    Stale,
}

impl CacheStatus {
    /// Marker as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Fresh => "fresh",
            CacheStatus::Cached => "cached",
            CacheStatus::Stale => "stale",
        }
    }
}

/// A fully buffered HTTP response.
///
/// The live response object of a real transport is not cacheable; this type
/// keeps the parts that matter (status, headers, body, protocol version) in
/// an owned, cloneable form, plus the [`CacheStatus`] provenance marker
/// stamped by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers, names lower-cased by convention.
    pub headers: HashMap<String, String>,
    /// Buffered response body.
    pub body: Bytes,
    /// Protocol version reported by the transport.
    pub version: Version,
    /// Provenance marker stamped by the pipeline.
    pub cache_status: CacheStatus,
}

impl Response {
    /// Creates an empty response with the given status, HTTP/1.1 and a
    /// `fresh` marker. Builder-style methods fill in the rest.
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
            version: Version::HTTP_11,
            cache_status: CacheStatus::Fresh,
        }
    }

    /// Adds a header. The name is lower-cased, the value kept verbatim.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
