// Per-call request options and the response wrapper returned by the gateway.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

/// Options applied to a single gateway call.
///
/// Mirrors what callers can tune per request: error reporting, whether the
/// session's `Authorization` header is attached, extra headers (notably the
/// backend's `filters` projection header) and query parameters.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Suppress the error-sink notification for this call. The error is
    /// still returned to the caller.
    pub silent_error: bool,
    /// Attach the session `Authorization` header when one is available.
    pub with_credentials: bool,
    /// Header overrides, applied after the client defaults.
    pub headers: Vec<(String, String)>,
    /// Entity field projections, sent comma-joined in the `filters` header.
    pub filters: Vec<String>,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            silent_error: false,
            with_credentials: true,
            headers: Vec::new(),
            filters: Vec::new(),
            query: Vec::new(),
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not notify the error sink if this call fails.
    pub fn silent(mut self) -> Self {
        self.silent_error = true;
        self
    }

    /// Send the request without the session `Authorization` header.
    pub fn without_credentials(mut self) -> Self {
        self.with_credentials = false;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.extend(filters.into_iter().map(Into::into));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Add a query parameter only when a value is present.
    pub fn query_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(name, v),
            None => self,
        }
    }

    /// Standard `limit` + optional `scrollId` paging parameters.
    pub fn paged(self, limit: u32, scroll_id: Option<&str>) -> Self {
        self.query("limit", limit).query_opt("scrollId", scroll_id)
    }
}

/// A decoded gateway response.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}
