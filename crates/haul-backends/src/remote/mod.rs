//! Remote link-manager backend.
//!
//! # Design
//! - Links land in a collector first; `promote` moves them to the download
//!   list once the collector has resolved them into packages.
//! - Handles remember the submitted job, so a retried `add` for the same
//!   transfer returns the existing handle instead of resubmitting.
//! - Moved ids are recorded before the download controller is started, so a
//!   retried `promote` resumes at the start call and cleanup of a collector
//!   handle reaches the moved links.
//! - Packages the download list has not shown yet are pending; a package that
//!   was listed and then vanished is not found.

mod client;
mod models;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use haul_config::RemoteConfig;
use haul_core::{
    BackendAdapter, BackendKind, Promotion, QueryOutcome, RawStatus, RemoteStage, TransferError,
    TransferHandle, TransferId, TransferRequest, TransferResult,
};
use reqwest::Client;
use tracing::{debug, info};

use crate::error::op_failed;
use client::RemoteClient;
use models::{AddLinksQuery, aggregate};

const KIND: BackendKind = BackendKind::Remote;
const DEFAULT_PACKAGE_PREFIX: &str = "haul-";

/// Adapter for a link manager reachable over its local JSON API.
pub struct RemoteAdapter {
    client: RemoteClient,
    package_prefix: String,
    jobs: Mutex<JobBook>,
}

/// What the adapter knows about submitted jobs, keyed by collector job id
/// where the transfer id is not available.
#[derive(Default)]
struct JobBook {
    submitted: HashMap<TransferId, TransferHandle>,
    moved: HashMap<i64, TransferHandle>,
    listed: HashSet<i64>,
}

struct RemoteIds<'a> {
    job_id: i64,
    package_ids: &'a [i64],
    link_ids: &'a [i64],
    stage: RemoteStage,
}

impl RemoteAdapter {
    /// Build an adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::BackendUnavailable`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: &RemoteConfig) -> TransferResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| TransferError::unavailable(KIND, "remote.client", err))?;
        Ok(Self {
            client: RemoteClient::new(http, &config.base_url, &config.connection),
            package_prefix: config
                .package_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_PACKAGE_PREFIX.to_string()),
            jobs: Mutex::new(JobBook::default()),
        })
    }

    fn book(&self) -> MutexGuard<'_, JobBook> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remembered(&self, id: TransferId) -> Option<TransferHandle> {
        self.book().submitted.get(&id).cloned()
    }

    fn remember(&self, id: TransferId, handle: TransferHandle) {
        self.book().submitted.insert(id, handle);
    }

    fn record_move(&self, job_id: i64, moved: &TransferHandle) {
        let mut book = self.book();
        for handle in book.submitted.values_mut() {
            if matches!(handle, TransferHandle::Remote { job_id: known, .. } if *known == job_id) {
                handle.clone_from(moved);
            }
        }
        book.moved.insert(job_id, moved.clone());
    }

    /// The download-list handle for `handle`, if its links were already moved.
    fn resolve(&self, handle: &TransferHandle) -> TransferHandle {
        match handle {
            TransferHandle::Remote {
                job_id,
                stage: RemoteStage::Collected,
                ..
            } => self
                .book()
                .moved
                .get(job_id)
                .cloned()
                .unwrap_or_else(|| handle.clone()),
            other => other.clone(),
        }
    }

    /// Note that the download list showed `job_id`; returns whether it had been seen before.
    fn mark_listed(&self, job_id: i64, present: bool) -> bool {
        let mut book = self.book();
        if present {
            !book.listed.insert(job_id)
        } else {
            book.listed.contains(&job_id)
        }
    }

    fn forget(&self, job_id: i64) {
        let mut book = self.book();
        book.submitted.retain(|_, handle| {
            !matches!(handle, TransferHandle::Remote { job_id: known, .. } if *known == job_id)
        });
        book.moved.remove(&job_id);
        book.listed.remove(&job_id);
    }

    /// Resolve collector ids for a job that has not been promoted yet.
    async fn collected_ids(&self, job_id: i64) -> TransferResult<(Vec<i64>, Vec<i64>)> {
        let links = self
            .client
            .collected_links(job_id)
            .await
            .map_err(|err| op_failed(KIND, "linkgrabber.query", &job_id.to_string(), err))?;
        let link_ids = links.iter().map(|link| link.uuid).collect();
        let mut package_ids: Vec<i64> = links.iter().map(|link| link.package_uuid).collect();
        package_ids.sort_unstable();
        package_ids.dedup();
        Ok((link_ids, package_ids))
    }

    async fn start(&self, job_id: i64) -> TransferResult<()> {
        self.client
            .start_downloads()
            .await
            .map_err(|err| op_failed(KIND, "downloads.start", &job_id.to_string(), err))
    }
}

fn remote_ids(handle: &TransferHandle) -> TransferResult<RemoteIds<'_>> {
    match handle {
        TransferHandle::Remote {
            job_id,
            package_ids,
            link_ids,
            stage,
        } => Ok(RemoteIds {
            job_id: *job_id,
            package_ids,
            link_ids,
            stage: *stage,
        }),
        _ => Err(TransferError::InvalidRequest {
            field: "handle",
            reason: "handle belongs to another backend",
        }),
    }
}

/// Removing ids the manager already forgot is not an error.
fn tolerate_missing(result: TransferResult<()>) -> TransferResult<()> {
    match result {
        Err(TransferError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

#[async_trait]
impl BackendAdapter for RemoteAdapter {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn ensure_connected(&self) -> TransferResult<()> {
        self.client
            .ping()
            .await
            .map_err(|err| op_failed(KIND, "remote.connect", "device", err))
    }

    async fn add(&self, request: &TransferRequest) -> TransferResult<TransferHandle> {
        if let Some(handle) = self.remembered(request.id()) {
            debug!(transfer_id = %request.id(), handle = %handle, "links already submitted");
            return Ok(handle);
        }
        let package_name = match request.tag() {
            Some(tag) => format!("{}{tag}-{}", self.package_prefix, request.id()),
            None => format!("{}{}", self.package_prefix, request.id()),
        };
        let destination = request.destination().to_string_lossy();
        let query = AddLinksQuery {
            autostart: false,
            links: request.source(),
            package_name: &package_name,
            destination_folder: &destination,
            overwrite_packagizer_rules: true,
        };
        let job_id = self
            .client
            .add_links(&query)
            .await
            .map_err(|err| op_failed(KIND, "linkgrabber.add", &package_name, err))?;
        let handle = TransferHandle::Remote {
            job_id,
            package_ids: Vec::new(),
            link_ids: Vec::new(),
            stage: RemoteStage::Collected,
        };
        self.remember(request.id(), handle.clone());
        info!(transfer_id = %request.id(), job_id, package = %package_name, "links collected");
        Ok(handle)
    }

    async fn promote(&self, handle: &TransferHandle) -> TransferResult<Promotion> {
        let ids = remote_ids(handle)?;
        if ids.stage == RemoteStage::Downloading {
            return Ok(Promotion::Promoted(handle.clone()));
        }
        let resolved = self.resolve(handle);
        if resolved != *handle {
            debug!(handle = %resolved, "links already moved; starting downloads");
            self.start(ids.job_id).await?;
            return Ok(Promotion::Promoted(resolved));
        }
        let (link_ids, package_ids) = self.collected_ids(ids.job_id).await?;
        if link_ids.is_empty() {
            return Ok(Promotion::Pending);
        }
        let subject = ids.job_id.to_string();
        self.client
            .move_to_downloads(&link_ids, &package_ids)
            .await
            .map_err(|err| op_failed(KIND, "linkgrabber.move", &subject, err))?;
        let promoted = TransferHandle::Remote {
            job_id: ids.job_id,
            package_ids,
            link_ids,
            stage: RemoteStage::Downloading,
        };
        self.record_move(ids.job_id, &promoted);
        self.start(ids.job_id).await?;
        debug!(handle = %promoted, "links moved to download list");
        Ok(Promotion::Promoted(promoted))
    }

    async fn query_status(&self, handle: &TransferHandle) -> TransferResult<QueryOutcome> {
        let ids = remote_ids(handle)?;
        if ids.stage == RemoteStage::Collected {
            return Ok(QueryOutcome::Pending);
        }
        let subject = ids.job_id.to_string();
        let links = self
            .client
            .download_links(ids.package_ids)
            .await
            .map_err(|err| op_failed(KIND, "downloads.query", &subject, err))?;
        let seen_before = self.mark_listed(ids.job_id, !links.is_empty());
        if links.is_empty() {
            if seen_before {
                return Err(TransferError::not_found("package", subject));
            }
            // Moved links take a moment to show up in the download list.
            return Ok(QueryOutcome::Pending);
        }
        Ok(QueryOutcome::Status(RawStatus::Remote(aggregate(&links))))
    }

    async fn cancel(&self, handle: &TransferHandle) -> TransferResult<()> {
        let resolved = self.resolve(handle);
        let ids = remote_ids(&resolved)?;
        if ids.stage == RemoteStage::Collected {
            return Ok(());
        }
        tolerate_missing(
            self.client
                .disable(ids.link_ids, ids.package_ids)
                .await
                .map_err(|err| op_failed(KIND, "downloads.disable", &ids.job_id.to_string(), err)),
        )
    }

    async fn remove(&self, handle: &TransferHandle, delete_files: bool) -> TransferResult<()> {
        let resolved = self.resolve(handle);
        let ids = remote_ids(&resolved)?;
        let subject = ids.job_id.to_string();
        let result = match ids.stage {
            RemoteStage::Collected => {
                let (link_ids, package_ids) = self.collected_ids(ids.job_id).await?;
                if link_ids.is_empty() {
                    Ok(())
                } else {
                    self.client
                        .remove_collected(&link_ids, &package_ids)
                        .await
                        .map_err(|err| op_failed(KIND, "linkgrabber.remove", &subject, err))
                }
            }
            RemoteStage::Downloading => self
                .client
                .remove_downloads(ids.link_ids, ids.package_ids, delete_files)
                .await
                .map_err(|err| op_failed(KIND, "downloads.remove", &subject, err)),
        };
        tolerate_missing(result)?;
        self.forget(ids.job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_config::RemoteConnectionMode;
    use haul_core::{TransferPhase, normalize};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn adapter(base_url: String, connection: RemoteConnectionMode) -> RemoteAdapter {
        RemoteAdapter::new(&RemoteConfig {
            base_url,
            connection,
            package_prefix: None,
            request_timeout: Duration::from_secs(5),
        })
        .expect("adapter")
    }

    fn request() -> TransferRequest {
        TransferRequest::new(
            "https://files.example.invalid/archive.rar",
            "/srv/remote",
            BackendKind::Remote,
        )
    }

    fn downloading(job_id: i64) -> TransferHandle {
        TransferHandle::Remote {
            job_id,
            package_ids: vec![10],
            link_ids: vec![100, 101],
            stage: RemoteStage::Downloading,
        }
    }

    #[tokio::test]
    async fn add_submits_once_per_transfer() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/linkgrabberv2/addLinks")
                .body_includes("\"autostart\":false")
                .body_includes("\"destinationFolder\":\"/srv/remote\"");
            then.status(200).json_body(json!({"data": {"id": 42}}));
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        let request = request();

        let first = adapter.add(&request).await?;
        let second = adapter.add(&request).await?;

        add.assert_calls(1);
        assert_eq!(first, second);
        assert!(matches!(
            first,
            TransferHandle::Remote { job_id: 42, stage: RemoteStage::Collected, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn account_mode_sends_credentials() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let ping = server.mock(|when, then| {
            when.method(POST)
                .path("/device/ping")
                .header_exists("authorization");
            then.status(200).json_body(json!({"data": true}));
        });
        let adapter = adapter(
            server.base_url(),
            RemoteConnectionMode::Account {
                username: "me".into(),
                password: "secret".into(),
            },
        );
        adapter.ensure_connected().await?;
        ping.assert();
        Ok(())
    }

    #[tokio::test]
    async fn promote_waits_for_collector() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let mut empty = server.mock(|when, then| {
            when.method(POST).path("/linkgrabberv2/queryLinks");
            then.status(200).json_body(json!({"data": []}));
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        let staged = TransferHandle::Remote {
            job_id: 42,
            package_ids: Vec::new(),
            link_ids: Vec::new(),
            stage: RemoteStage::Collected,
        };
        assert_eq!(adapter.promote(&staged).await?, Promotion::Pending);
        assert_eq!(adapter.query_status(&staged).await?, QueryOutcome::Pending);

        empty.delete();
        let _collected = server.mock(|when, then| {
            when.method(POST)
                .path("/linkgrabberv2/queryLinks")
                .body_includes("\"jobUUIDs\":[42]");
            then.status(200).json_body(json!({"data": [
                {"uuid": 100, "packageUUID": 10},
                {"uuid": 101, "packageUUID": 10}
            ]}));
        });
        let moved = server.mock(|when, then| {
            when.method(POST)
                .path("/linkgrabberv2/moveToDownloadlist")
                .json_body(json!([[100, 101], [10]]));
            then.status(200).json_body(json!({"data": null}));
        });
        let started = server.mock(|when, then| {
            when.method(POST).path("/downloadcontroller/start");
            then.status(200).json_body(json!({"data": true}));
        });

        assert_eq!(
            adapter.promote(&staged).await?,
            Promotion::Promoted(downloading(42))
        );
        moved.assert();
        started.assert();
        Ok(())
    }

    #[tokio::test]
    async fn query_aggregates_package_links() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let _links = server.mock(|when, then| {
            when.method(POST)
                .path("/downloadsV2/queryLinks")
                .body_includes("\"packageUUIDs\":[10]");
            then.status(200).json_body(json!({"data": [
                {"name": "a.part1.rar", "bytesTotal": 600, "bytesLoaded": 300,
                 "speed": 100, "eta": 3, "status": "Downloading", "running": true},
                {"name": "a.part2.rar", "bytesTotal": 400, "bytesLoaded": 0,
                 "status": "Queued"}
            ]}));
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        let QueryOutcome::Status(raw) = adapter.query_status(&downloading(42)).await? else {
            return Err("expected status".into());
        };
        let status = normalize(BackendKind::Remote, &raw);
        assert_eq!(status.phase, TransferPhase::Running);
        assert_eq!(status.bytes_total, 1000);
        assert_eq!(status.bytes_done, 300);
        Ok(())
    }

    #[tokio::test]
    async fn unlisted_package_is_pending_until_seen() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let mut empty = server.mock(|when, then| {
            when.method(POST).path("/downloadsV2/queryLinks");
            then.status(200).json_body(json!({"data": []}));
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        assert_eq!(
            adapter.query_status(&downloading(42)).await?,
            QueryOutcome::Pending
        );

        empty.delete();
        let mut listed = server.mock(|when, then| {
            when.method(POST).path("/downloadsV2/queryLinks");
            then.status(200).json_body(json!({"data": [
                {"name": "a.rar", "bytesTotal": 100, "bytesLoaded": 10, "status": "Downloading"}
            ]}));
        });
        assert!(matches!(
            adapter.query_status(&downloading(42)).await?,
            QueryOutcome::Status(_)
        ));

        listed.delete();
        let _gone = server.mock(|when, then| {
            when.method(POST).path("/downloadsV2/queryLinks");
            then.status(200).json_body(json!({"data": []}));
        });
        let err = adapter
            .query_status(&downloading(42))
            .await
            .expect_err("package vanished");
        assert!(matches!(err, TransferError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn promote_resumes_after_failed_start() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let mut collected = server.mock(|when, then| {
            when.method(POST).path("/linkgrabberv2/queryLinks");
            then.status(200).json_body(json!({"data": [
                {"uuid": 100, "packageUUID": 10},
                {"uuid": 101, "packageUUID": 10}
            ]}));
        });
        let moved = server.mock(|when, then| {
            when.method(POST).path("/linkgrabberv2/moveToDownloadlist");
            then.status(200).json_body(json!({"data": null}));
        });
        let mut refused = server.mock(|when, then| {
            when.method(POST).path("/downloadcontroller/start");
            then.status(503).body("busy");
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        let staged = TransferHandle::Remote {
            job_id: 42,
            package_ids: Vec::new(),
            link_ids: Vec::new(),
            stage: RemoteStage::Collected,
        };

        let err = adapter.promote(&staged).await.expect_err("start refused");
        assert!(err.is_transient());

        // The links left the collector with the move.
        collected.delete();
        refused.delete();
        let _empty = server.mock(|when, then| {
            when.method(POST).path("/linkgrabberv2/queryLinks");
            then.status(200).json_body(json!({"data": []}));
        });
        let started = server.mock(|when, then| {
            when.method(POST).path("/downloadcontroller/start");
            then.status(200).json_body(json!({"data": true}));
        });
        assert_eq!(
            adapter.promote(&staged).await?,
            Promotion::Promoted(downloading(42))
        );
        moved.assert_calls(1);
        started.assert_calls(1);

        let cleanup = server.mock(|when, then| {
            when.method(POST)
                .path("/downloadsV2/cleanup")
                .body_includes("[100,101]");
            then.status(200).json_body(json!({"data": null}));
        });
        adapter.remove(&staged, true).await?;
        cleanup.assert();
        Ok(())
    }

    #[tokio::test]
    async fn remove_deletes_files_and_tolerates_repeats() -> Result<(), Box<dyn std::error::Error>>
    {
        let server = MockServer::start_async().await;
        let mut cleanup = server.mock(|when, then| {
            when.method(POST)
                .path("/downloadsV2/cleanup")
                .body_includes("REMOVE_LINKS_AND_DELETE_FILES");
            then.status(200).json_body(json!({"data": null}));
        });
        let adapter = adapter(server.base_url(), RemoteConnectionMode::Direct);
        adapter.remove(&downloading(42), true).await?;
        cleanup.assert();

        cleanup.delete();
        let _gone = server.mock(|when, then| {
            when.method(POST).path("/downloadsV2/cleanup");
            then.status(404).json_body(json!({"type": "LINK_NOT_FOUND"}));
        });
        adapter.remove(&downloading(42), true).await?;
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_manager_is_transient() {
        let adapter = adapter("http://127.0.0.1:9".into(), RemoteConnectionMode::Direct);
        let err = adapter.add(&request()).await.expect_err("connection refused");
        assert!(err.is_transient());
    }
}
