//! JSON-over-HTTP client for the link-manager API.
//!
//! Calls are `POST {base}/{namespace}/{method}` with the parameters as a JSON
//! body; responses carry the result under `data`.

use haul_config::RemoteConnectionMode;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{BackendError, status_error};
use crate::remote::models::{
    AddLinksQuery, CollectedLink, CollectingJob, CollectorQuery, DownloadLink, DownloadQuery,
    Envelope,
};

type ClientResult<T> = Result<T, BackendError>;

pub(crate) struct RemoteClient {
    http: Client,
    base_url: String,
    account: Option<(String, String)>,
}

impl RemoteClient {
    pub(crate) fn new(http: Client, base_url: &str, mode: &RemoteConnectionMode) -> Self {
        let account = match mode {
            RemoteConnectionMode::Direct => None,
            RemoteConnectionMode::Account { username, password } => {
                Some((username.clone(), password.clone()))
            }
        };
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account,
        }
    }

    async fn call<B, T>(&self, path: &str, body: &B) -> ClientResult<Option<T>>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(format!("{}{path}", self.base_url)).json(body);
        if let Some((username, password)) = &self.account {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    /// Round-trip a cheap call to confirm the manager is reachable.
    pub(crate) async fn ping(&self) -> ClientResult<()> {
        let _: Option<Value> = self.call("/device/ping", &json!([])).await?;
        Ok(())
    }

    /// Submit links to the collector without starting them.
    pub(crate) async fn add_links(&self, query: &AddLinksQuery<'_>) -> ClientResult<i64> {
        let job: Option<CollectingJob> = self.call("/linkgrabberv2/addLinks", query).await?;
        let job = job.ok_or_else(|| BackendError::Api {
            message: "addLinks returned no job".into(),
        })?;
        debug!(job_id = job.id, "links submitted to collector");
        Ok(job.id)
    }

    /// Links the collector produced for a job.
    pub(crate) async fn collected_links(&self, job_id: i64) -> ClientResult<Vec<CollectedLink>> {
        let query = CollectorQuery {
            job_uuids: &[job_id],
            name: true,
            bytes_total: true,
        };
        let links: Option<Vec<CollectedLink>> =
            self.call("/linkgrabberv2/queryLinks", &[query]).await?;
        Ok(links.unwrap_or_default())
    }

    /// Move collected links to the download list.
    pub(crate) async fn move_to_downloads(
        &self,
        link_ids: &[i64],
        package_ids: &[i64],
    ) -> ClientResult<()> {
        let _: Option<Value> = self
            .call("/linkgrabberv2/moveToDownloadlist", &json!([link_ids, package_ids]))
            .await?;
        Ok(())
    }

    /// Make sure the download controller is running.
    pub(crate) async fn start_downloads(&self) -> ClientResult<()> {
        let _: Option<Value> = self.call("/downloadcontroller/start", &json!([])).await?;
        Ok(())
    }

    /// Download-list links belonging to the given packages.
    pub(crate) async fn download_links(
        &self,
        package_ids: &[i64],
    ) -> ClientResult<Vec<DownloadLink>> {
        let query = DownloadQuery::progress(package_ids);
        let links: Option<Vec<DownloadLink>> =
            self.call("/downloadsV2/queryLinks", &[query]).await?;
        Ok(links.unwrap_or_default())
    }

    /// Disable links so the controller stops fetching them.
    pub(crate) async fn disable(&self, link_ids: &[i64], package_ids: &[i64]) -> ClientResult<()> {
        let _: Option<Value> = self
            .call("/downloadsV2/setEnabled", &json!([false, link_ids, package_ids]))
            .await?;
        Ok(())
    }

    /// Drop links from the collector.
    pub(crate) async fn remove_collected(
        &self,
        link_ids: &[i64],
        package_ids: &[i64],
    ) -> ClientResult<()> {
        let _: Option<Value> = self
            .call("/linkgrabberv2/removeLinks", &json!([link_ids, package_ids]))
            .await?;
        Ok(())
    }

    /// Drop links from the download list, optionally deleting their files.
    pub(crate) async fn remove_downloads(
        &self,
        link_ids: &[i64],
        package_ids: &[i64],
        delete_files: bool,
    ) -> ClientResult<()> {
        let _: Option<Value> = if delete_files {
            self.call(
                "/downloadsV2/cleanup",
                &json!([
                    link_ids,
                    package_ids,
                    "DELETE_ALL",
                    "REMOVE_LINKS_AND_DELETE_FILES",
                    "SELECTED"
                ]),
            )
            .await?
        } else {
            self.call("/downloadsV2/removeLinks", &json!([link_ids, package_ids]))
                .await?
        };
        Ok(())
    }
}
