//! Minimal torrent client web API (`/api/v2`) wrapper.

use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::error::{BackendError, status_error};
use crate::torrent::models::TorrentInfo;

type ClientResult<T> = Result<T, BackendError>;

/// What to hand to `torrents/add`.
pub(crate) enum TorrentPayload {
    /// Magnet or HTTP(S) URL fetched by the client itself.
    Url(String),
    /// Raw `.torrent` file contents.
    File {
        /// File name reported in the upload.
        name: String,
        /// Metainfo bytes.
        bytes: Vec<u8>,
    },
}

/// Options applied to a new torrent.
pub(crate) struct AddOptions<'a> {
    pub(crate) save_path: &'a str,
    pub(crate) category: Option<&'a str>,
    pub(crate) tags: &'a [&'a str],
}

pub(crate) struct QbitClient {
    http: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    authenticated: AtomicBool,
}

impl QbitClient {
    pub(crate) fn new(
        http: Client,
        base_url: &str,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            authenticated: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.base_url, path)
    }

    /// Log in (when credentials are configured) or query the API version.
    pub(crate) async fn connect(&self) -> ClientResult<()> {
        if self.credentials.is_some() {
            if !self.authenticated.load(Ordering::Acquire) {
                self.login().await?;
            }
            return Ok(());
        }
        let response = self.http.get(self.url("/app/version")).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    /// `POST /auth/login`; the session cookie is kept by the client's cookie store.
    pub(crate) async fn login(&self) -> ClientResult<()> {
        let Some((username, password)) = &self.credentials else {
            return Ok(());
        };
        let response = self
            .http
            .post(self.url("/auth/login"))
            .form(&[("username", username.as_str()), ("password", password.as_str())])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() && body.trim() == "Ok." {
            debug!(base_url = %self.base_url, "torrent client session established");
            self.authenticated.store(true, Ordering::Release);
            return Ok(());
        }
        self.authenticated.store(false, Ordering::Release);
        if status.is_server_error() {
            return Err(BackendError::Status { status, body });
        }
        Err(BackendError::Auth { detail: body })
    }

    /// Send a request, logging in again once if the session expired (HTTP 403).
    async fn send<F>(&self, build: F) -> ClientResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = build(&self.http).send().await?;
        if response.status() != StatusCode::FORBIDDEN || self.credentials.is_none() {
            return Ok(response);
        }
        debug!(base_url = %self.base_url, "torrent client session expired; logging in again");
        self.authenticated.store(false, Ordering::Release);
        self.login().await?;
        Ok(build(&self.http).send().await?)
    }

    /// `GET /torrents/info` filtered by tag.
    pub(crate) async fn info_by_tag(&self, tag: &str) -> ClientResult<Vec<TorrentInfo>> {
        let url = self.url("/torrents/info");
        let response = self
            .send(|http| http.get(&url).query(&[("tag", tag)]))
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    /// `GET /torrents/info` filtered by info-hash.
    pub(crate) async fn info_by_hash(&self, hash: &str) -> ClientResult<Vec<TorrentInfo>> {
        let url = self.url("/torrents/info");
        let response = self
            .send(|http| http.get(&url).query(&[("hashes", hash)]))
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    /// `POST /torrents/add` as multipart form.
    pub(crate) async fn add(
        &self,
        payload: &TorrentPayload,
        options: &AddOptions<'_>,
    ) -> ClientResult<()> {
        let url = self.url("/torrents/add");
        let tags = options.tags.join(",");
        let response = self
            .send(|http| {
                let mut form = match payload {
                    TorrentPayload::Url(link) => Form::new().text("urls", link.clone()),
                    TorrentPayload::File { name, bytes } => Form::new().part(
                        "torrents",
                        Part::bytes(bytes.clone()).file_name(name.clone()),
                    ),
                };
                form = form
                    .text("savepath", options.save_path.to_string())
                    .text("tags", tags.clone());
                if let Some(category) = options.category {
                    form = form.text("category", category.to_string());
                }
                http.post(&url).multipart(form)
            })
            .await?;
        let response = expect_success(response).await?;
        let body = response.text().await.unwrap_or_default();
        if body.trim() == "Fails." {
            return Err(BackendError::Api {
                message: "torrent client refused the torrent".into(),
            });
        }
        Ok(())
    }

    /// Stop a torrent; falls back to the pre-5.0 `pause` endpoint.
    pub(crate) async fn stop(&self, hashes: &str) -> ClientResult<()> {
        for path in ["/torrents/stop", "/torrents/pause"] {
            let url = self.url(path);
            let response = self
                .send(|http| http.post(&url).form(&[("hashes", hashes)]))
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            expect_success(response).await?;
            return Ok(());
        }
        Ok(())
    }

    /// `POST /torrents/delete`.
    pub(crate) async fn delete(&self, hashes: &str, delete_files: bool) -> ClientResult<()> {
        let url = self.url("/torrents/delete");
        let flag = if delete_files { "true" } else { "false" };
        let response = self
            .send(|http| {
                http.post(&url)
                    .form(&[("hashes", hashes), ("deleteFiles", flag)])
            })
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    /// `POST /torrents/deleteTags`.
    pub(crate) async fn delete_tag(&self, tag: &str) -> ClientResult<()> {
        let url = self.url("/torrents/deleteTags");
        let response = self
            .send(|http| http.post(&url).form(&[("tags", tag)]))
            .await?;
        expect_success(response).await?;
        Ok(())
    }
}

async fn expect_success(response: Response) -> ClientResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}
