// Async HTTP gateway for the BDS backend.
//
// Every service call goes through `ApiClient`: default headers (AppId,
// DeviceId, Translation, ApiToken, Accept-Language), the session
// `Authorization` header, error normalization and reporting.

mod request;
mod sink;

use std::sync::{Arc, RwLock};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

pub use request::{ApiResponse, RequestOptions};
pub use sink::{CredentialProvider, ErrorSink, TracingErrorSink};

use crate::error::{ApiErrorEnvelope, Error};
use crate::transport::TransportConfig;

/// Context label attached to every error-sink notification.
pub const ERROR_CONTEXT: &str = "apiService";

const FILTERS_HEADER: &str = "filters";
const BODY_PREVIEW_CHARS: usize = 200;

// ── Settings ─────────────────────────────────────────────────────────

/// Static gateway settings, resolved from the application configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Backend base URL; relative request paths are joined onto it.
    pub base_url: Url,
    pub app_id: String,
    pub device_id: String,
    pub api_token: Option<SecretString>,
    /// Send `Translation: true` so the backend localizes payloads.
    pub apply_translation: bool,
    /// Only report backend-defined (custom) errors to the sink.
    pub throw_only_custom_error: bool,
}

impl GatewaySettings {
    pub fn new(
        base_url: &str,
        app_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            app_id: app_id.into(),
            device_id: device_id.into(),
            api_token: None,
            apply_translation: false,
            throw_only_custom_error: false,
        })
    }

    fn default_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert("AppId", header_value(&self.app_id)?);
        headers.insert("DeviceId", header_value(&self.device_id)?);
        if self.apply_translation {
            headers.insert("Translation", HeaderValue::from_static("true"));
        }
        if let Some(token) = &self.api_token {
            let mut value = header_value(token.expose_secret())?;
            value.set_sensitive(true);
            headers.insert("ApiToken", value);
        }
        Ok(headers)
    }
}

/// Ensure the base URL ends with `/` so `Url::join` appends instead of
/// replacing the last segment.
fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn header_value(raw: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(raw).map_err(|e| Error::InvalidHeader(format!("{raw:?}: {e}")))
}

// ── In-flight tracking ───────────────────────────────────────────────

struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the BDS REST backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    headers: RwLock<HeaderMap>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    error_sink: Arc<dyn ErrorSink>,
    throw_only_custom_error: bool,
    in_flight: watch::Sender<usize>,
}

impl ApiClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client with a fresh `reqwest::Client` from `transport`.
    pub fn new(settings: &GatewaySettings, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(settings, http)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(settings: &GatewaySettings, http: reqwest::Client) -> Result<Self, Error> {
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            headers: RwLock::new(settings.default_headers()?),
            credentials: None,
            error_sink: Arc::new(TracingErrorSink),
            throw_only_custom_error: settings.throw_only_custom_error,
            in_flight,
        })
    }

    /// Attach the source of the session `Authorization` header.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Replace the default tracing error sink.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Set the `Accept-Language` header sent on every request.
    pub fn set_accept_language(&self, language: &str) -> Result<(), Error> {
        let value = header_value(language)?;
        self.headers
            .write()
            .expect("header lock poisoned")
            .insert(reqwest::header::ACCEPT_LANGUAGE, value);
        Ok(())
    }

    /// Current `Accept-Language`, if one was set.
    pub fn accept_language(&self) -> Option<String> {
        self.headers
            .read()
            .expect("header lock poisoned")
            .get(reqwest::header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Number of requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Observe the in-flight request count (drives loading indicators).
    pub fn watch_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Resolve a path: absolute URLs pass through, anything else is
    /// joined onto the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        if let Ok(absolute) = Url::parse(path) {
            return Ok(absolute);
        }
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let builder = self.request(Method::GET, path, opts)?;
        self.execute(builder, opts).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let builder = self.request(Method::POST, path, opts)?.json(body);
        self.execute(builder, opts).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let builder = self.request(Method::PUT, path, opts)?.json(body);
        self.execute(builder, opts).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let builder = self.request(Method::PATCH, path, opts)?.json(body);
        self.execute(builder, opts).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let builder = self.request(Method::DELETE, path, opts)?;
        self.execute(builder, opts).await
    }

    /// GET returning the raw body text (markdown, html, plain files).
    pub async fn get_text(
        &self,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<String>, Error> {
        let builder = self.request(Method::GET, path, opts)?;
        let _guard = InFlight::enter(&self.in_flight);
        let resp = self.send(builder, opts).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let data = resp.text().await?;
        Ok(ApiResponse { status, headers, data })
    }

    // ── Request assembly ─────────────────────────────────────────────

    fn request(
        &self,
        method: Method,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<RequestBuilder, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut headers = self.headers.read().expect("header lock poisoned").clone();

        if opts.with_credentials {
            if let Some(auth) = self.credentials.as_ref().and_then(|c| c.authorization()) {
                let mut value = header_value(&auth)?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        if !opts.filters.is_empty() {
            headers.insert(FILTERS_HEADER, header_value(&opts.filters.join(","))?);
        }

        for (name, value) in &opts.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidHeader(format!("{name:?}: {e}")))?;
            headers.insert(name, header_value(value)?);
        }

        let mut builder = self.http.request(method, url).headers(headers);
        if !opts.query.is_empty() {
            builder = builder.query(&opts.query);
        }
        Ok(builder)
    }

    // ── Response handling ────────────────────────────────────────────

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        opts: &RequestOptions,
    ) -> Result<ApiResponse<T>, Error> {
        let _guard = InFlight::enter(&self.in_flight);
        let resp = self.send(builder, opts).await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await?;

        // Empty bodies decode as `null` so `()` and `Option<T>` work.
        let raw = if body.trim().is_empty() { "null" } else { body.as_str() };
        let data = serde_json::from_str(raw).map_err(|e| {
            let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })?;

        Ok(ApiResponse { status, headers, data })
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        opts: &RequestOptions,
    ) -> Result<reqwest::Response, Error> {
        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let envelope = ApiErrorEnvelope {
                    error_message: Some(e.to_string()),
                    ..ApiErrorEnvelope::default()
                };
                self.report(&envelope, opts);
                return Err(Error::Transport(e));
            }
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let raw = resp.text().await.unwrap_or_default();
        let envelope = ApiErrorEnvelope::from_response(status, &raw);
        self.report(&envelope, opts);
        Err(Error::Api(Box::new(envelope)))
    }

    fn report(&self, envelope: &ApiErrorEnvelope, opts: &RequestOptions) {
        if opts.silent_error {
            return;
        }
        if self.throw_only_custom_error && !envelope.custom {
            return;
        }
        self.error_sink.report(ERROR_CONTEXT, envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base_url("https://api.example.com/v2").expect("valid url");
        assert_eq!(url.as_str(), "https://api.example.com/v2/");
    }

    #[test]
    fn absolute_paths_bypass_base_url() {
        let settings = GatewaySettings::new("https://api.example.com/", "app", "device")
            .expect("valid settings");
        let client = ApiClient::from_reqwest(&settings, reqwest::Client::new()).expect("client");

        let joined = client.url("api/bds/v1/users/me").expect("joined");
        assert_eq!(joined.as_str(), "https://api.example.com/api/bds/v1/users/me");

        let absolute = client.url("https://cdn.example.com/a.md").expect("absolute");
        assert_eq!(absolute.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn settings_emit_translation_and_token_headers() {
        let mut settings = GatewaySettings::new("https://api.example.com/", "app-1", "dev-1")
            .expect("valid settings");
        settings.apply_translation = true;
        settings.api_token = Some(SecretString::from("tok"));

        let headers = settings.default_headers().expect("headers");
        assert_eq!(headers.get("AppId").and_then(|v| v.to_str().ok()), Some("app-1"));
        assert_eq!(headers.get("Translation").and_then(|v| v.to_str().ok()), Some("true"));
        assert!(headers.get("ApiToken").is_some_and(HeaderValue::is_sensitive));
    }
}
