//! Thin HTTP client for WebDAV requests.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, Response, StatusCode};
use thiserror::Error;
use url::Url;
use vdrive_kernel::drive::DriveError;
use vdrive_kernel::i18n::t;

use crate::config::WebDavConfig;

/// Failure of a single WebDAV request.
#[derive(Debug, Error)]
pub(crate) enum RequestError {
    /// `412 Precondition Failed`, e.g. `Overwrite: F` against an existing
    /// destination. Some callers treat this as a conflict rather than a
    /// failure, so it is kept apart from other statuses.
    #[error("precondition failed")]
    PreconditionFailed,

    #[error(transparent)]
    Drive(#[from] DriveError),
}

impl From<RequestError> for DriveError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::PreconditionFailed => DriveError::remote_api(
                StatusCode::PRECONDITION_FAILED.as_u16(),
                t("drive.webdav.remote_error", &["412"]),
            ),
            RequestError::Drive(e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WebDavClient {
    http: reqwest::Client,
    base: Url,
    username: Option<String>,
    password: String,
}

impl WebDavClient {
    pub(crate) fn new(config: &WebDavConfig) -> Result<Self, DriveError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DriveError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Absolute URL of a drive path, percent-encoding each segment. The
    /// drive root keeps its trailing slash, since redirects are not followed.
    pub(crate) fn build_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let mut parts = path.split('/').filter(|s| !s.is_empty()).peekable();
        if parts.peek().is_none() {
            if !url.path().ends_with('/') {
                let collection = format!("{}/", url.path());
                url.set_path(&collection);
            }
            return url;
        }
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(parts);
        }
        url
    }

    /// `Authorization` header value, when credentials are configured.
    pub(crate) fn basic_auth_header(&self) -> Option<String> {
        self.username.as_ref().map(|user| {
            let token = STANDARD.encode(format!("{user}:{}", self.password));
            format!("Basic {token}")
        })
    }

    /// Send one request and map non-2xx statuses onto drive errors.
    pub(crate) async fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, String)],
        body: Option<reqwest::Body>,
    ) -> Result<Response, RequestError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| DriveError::other(format!("invalid method '{method}': {e}")))?;
        let url = self.build_url(path);

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(user) = &self.username {
            request = request.basic_auth(user, Some(&self.password));
        }
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            DriveError::other(format!("{method} {url} failed: {e}"))
        })?;
        let status = response.status();
        tracing::debug!(%method, path, status = status.as_u16(), "webdav request");

        if status.is_success() {
            return Ok(response);
        }
        Err(match status {
            StatusCode::NOT_FOUND => DriveError::not_found(path).into(),
            StatusCode::PRECONDITION_FAILED => RequestError::PreconditionFailed,
            StatusCode::UNAUTHORIZED => {
                DriveError::unauthorized(t("drive.webdav.wrong_user_or_password", &[])).into()
            }
            other => {
                let code = other.as_u16().to_string();
                let message = t("drive.webdav.remote_error", &[code.as_str()]);
                DriveError::remote_api(other.as_u16(), message).into()
            }
        })
    }
}
