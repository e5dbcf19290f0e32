//! Torrent backend driven through the client's web API.
//!
//! # Design
//! - Every torrent carries a `haul-<transfer id>` tag, so `add` can detect an
//!   earlier attempt and lookups work before the info-hash is known.
//! - Cleanup resolves torrents by tag; nothing left to delete is a no-op.
//! - A torrent missing from the client is pending until it has been listed
//!   once; after that its absence means it was deleted.

mod client;
mod models;

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use haul_config::TorrentConfig;
use haul_core::{
    BackendAdapter, BackendKind, QueryOutcome, RawStatus, TransferError, TransferHandle,
    TransferRequest, TransferResult,
};
use reqwest::Client;
use tracing::{debug, info};

use crate::error::{io_failed, op_failed};
use client::{AddOptions, QbitClient, TorrentPayload};
use models::{TorrentInfo, magnet_info_hash, tracking_tag};

const KIND: BackendKind = BackendKind::Torrent;

/// Adapter for a torrent client exposing the `/api/v2` web API.
pub struct TorrentAdapter {
    client: QbitClient,
    category: Option<String>,
    observed: Mutex<HashSet<String>>,
}

impl TorrentAdapter {
    /// Build an adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::BackendUnavailable`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: &TorrentConfig) -> TransferResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| TransferError::unavailable(KIND, "torrent.client", err))?;
        let credentials = config.username.clone().zip(config.password.clone());
        Ok(Self {
            client: QbitClient::new(http, &config.base_url, credentials),
            category: config.category.clone(),
            observed: Mutex::new(HashSet::new()),
        })
    }

    async fn lookup(&self, tag: &str, hash: Option<&str>) -> TransferResult<Vec<TorrentInfo>> {
        let result = match hash {
            Some(hash) => self.client.info_by_hash(hash).await,
            None => self.client.info_by_tag(tag).await,
        };
        result.map_err(|err| op_failed(KIND, "torrents.info", tag, err))
    }

    fn observe(&self, tag: &str) {
        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        if !observed.contains(tag) {
            observed.insert(tag.to_string());
        }
    }

    fn was_observed(&self, tag: &str) -> bool {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tag)
    }

    async fn resolve_hashes(
        &self,
        tag: &str,
        hash: Option<&str>,
    ) -> TransferResult<Option<String>> {
        let found = self.lookup(tag, hash).await?;
        if found.is_empty() {
            return Ok(None);
        }
        let hashes: Vec<_> = found.into_iter().map(|info| info.hash).collect();
        Ok(Some(hashes.join("|")))
    }
}

fn torrent_handle(handle: &TransferHandle) -> TransferResult<(&str, Option<&str>)> {
    match handle {
        TransferHandle::Torrent { tag, hash } => Ok((tag.as_str(), hash.as_deref())),
        _ => Err(TransferError::InvalidRequest {
            field: "handle",
            reason: "handle belongs to another backend",
        }),
    }
}

async fn payload_for(source: &str) -> TransferResult<TorrentPayload> {
    let source = source.trim();
    let lowered = source.to_ascii_lowercase();
    if lowered.starts_with("magnet:")
        || lowered.starts_with("http://")
        || lowered.starts_with("https://")
    {
        return Ok(TorrentPayload::Url(source.to_string()));
    }
    let path = std::path::Path::new(source);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| io_failed("torrent.read_metainfo", path, err))?;
    let name = path
        .file_name()
        .map_or_else(|| "upload.torrent".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(TorrentPayload::File { name, bytes })
}

#[async_trait]
impl BackendAdapter for TorrentAdapter {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn ensure_connected(&self) -> TransferResult<()> {
        self.client
            .connect()
            .await
            .map_err(|err| op_failed(KIND, "torrent.connect", "session", err))
    }

    async fn add(&self, request: &TransferRequest) -> TransferResult<TransferHandle> {
        let tag = tracking_tag(request.id());
        if let Some(existing) = self.lookup(&tag, None).await?.into_iter().next() {
            debug!(tag = %tag, hash = %existing.hash, "torrent already present; reusing");
            return Ok(TransferHandle::Torrent {
                tag,
                hash: Some(existing.hash),
            });
        }

        let payload = payload_for(request.source()).await?;
        let save_path = request.destination().to_string_lossy();
        let mut tags = vec![tag.as_str()];
        if let Some(extra) = request.tag() {
            tags.push(extra);
        }
        let options = AddOptions {
            save_path: &save_path,
            category: self.category.as_deref(),
            tags: &tags,
        };
        self.client
            .add(&payload, &options)
            .await
            .map_err(|err| op_failed(KIND, "torrents.add", &tag, err))?;
        info!(tag = %tag, "torrent submitted");
        Ok(TransferHandle::Torrent {
            hash: magnet_info_hash(request.source()),
            tag,
        })
    }

    async fn query_status(&self, handle: &TransferHandle) -> TransferResult<QueryOutcome> {
        let (tag, hash) = torrent_handle(handle)?;
        let Some(info) = self.lookup(tag, hash).await?.into_iter().next() else {
            if self.was_observed(tag) {
                return Err(TransferError::not_found("torrent", tag));
            }
            // Freshly added torrents take a moment to show up.
            return Ok(QueryOutcome::Pending);
        };
        self.observe(tag);
        Ok(QueryOutcome::Status(RawStatus::Torrent(info.into_raw())))
    }

    async fn cancel(&self, handle: &TransferHandle) -> TransferResult<()> {
        let (tag, hash) = torrent_handle(handle)?;
        let Some(hashes) = self.resolve_hashes(tag, hash).await? else {
            return Ok(());
        };
        self.client
            .stop(&hashes)
            .await
            .map_err(|err| op_failed(KIND, "torrents.stop", tag, err))
    }

    async fn remove(&self, handle: &TransferHandle, delete_files: bool) -> TransferResult<()> {
        let (tag, hash) = torrent_handle(handle)?;
        if let Some(hashes) = self.resolve_hashes(tag, hash).await? {
            self.client
                .delete(&hashes, delete_files)
                .await
                .map_err(|err| op_failed(KIND, "torrents.delete", tag, err))?;
        }
        self.client
            .delete_tag(tag)
            .await
            .map_err(|err| op_failed(KIND, "torrents.delete_tags", tag, err))?;
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
        Ok(())
    }
}
