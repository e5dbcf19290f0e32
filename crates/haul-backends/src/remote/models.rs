//! Request and response shapes for the link-manager API.

use haul_core::RemoteRawStatus;
use serde::{Deserialize, Serialize};

/// Every response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) data: Option<T>,
}

/// Body of `linkgrabberv2/addLinks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddLinksQuery<'a> {
    pub(crate) autostart: bool,
    pub(crate) links: &'a str,
    pub(crate) package_name: &'a str,
    pub(crate) destination_folder: &'a str,
    pub(crate) overwrite_packagizer_rules: bool,
}

/// Job created by `addLinks`.
#[derive(Debug, Deserialize)]
pub(crate) struct CollectingJob {
    pub(crate) id: i64,
}

/// Field selection for `linkgrabberv2/queryLinks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectorQuery<'a> {
    #[serde(rename = "jobUUIDs")]
    pub(crate) job_uuids: &'a [i64],
    pub(crate) name: bool,
    pub(crate) bytes_total: bool,
}

/// Link sitting in the collector.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectedLink {
    pub(crate) uuid: i64,
    #[serde(rename = "packageUUID")]
    pub(crate) package_uuid: i64,
}

/// Field selection for `downloadsV2/queryLinks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DownloadQuery<'a> {
    #[serde(rename = "packageUUIDs")]
    pub(crate) package_uuids: &'a [i64],
    pub(crate) name: bool,
    pub(crate) bytes_total: bool,
    pub(crate) bytes_loaded: bool,
    pub(crate) speed: bool,
    pub(crate) eta: bool,
    pub(crate) status: bool,
    pub(crate) finished: bool,
    pub(crate) running: bool,
}

impl<'a> DownloadQuery<'a> {
    pub(crate) const fn progress(package_uuids: &'a [i64]) -> Self {
        Self {
            package_uuids,
            name: true,
            bytes_total: true,
            bytes_loaded: true,
            speed: true,
            eta: true,
            status: true,
            finished: true,
            running: true,
        }
    }
}

/// Link on the download list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct DownloadLink {
    pub(crate) name: Option<String>,
    pub(crate) bytes_total: Option<i64>,
    pub(crate) bytes_loaded: i64,
    pub(crate) speed: Option<i64>,
    pub(crate) eta: Option<i64>,
    pub(crate) status: Option<String>,
    pub(crate) finished: bool,
    pub(crate) running: bool,
}

/// Fold the links of a transfer's packages into one status.
///
/// Totals are only known when every link reports one. A package is finished
/// when all of its links are; the status text of the first unfinished link
/// wins so failures are not masked by finished siblings.
pub(crate) fn aggregate(links: &[DownloadLink]) -> RemoteRawStatus {
    let positive = |value: Option<i64>| value.and_then(|v| u64::try_from(v).ok());
    let bytes_total = links
        .iter()
        .map(|link| positive(link.bytes_total).filter(|total| *total > 0))
        .sum::<Option<u64>>();
    let bytes_loaded = links
        .iter()
        .map(|link| positive(Some(link.bytes_loaded)).unwrap_or(0))
        .sum();
    let speeds: Vec<u64> = links.iter().filter_map(|link| positive(link.speed)).collect();
    let status = links
        .iter()
        .find(|link| !link.finished)
        .or_else(|| links.first())
        .and_then(|link| link.status.clone());
    let name = match links {
        [single] => single.name.clone(),
        _ => None,
    };
    RemoteRawStatus {
        name,
        bytes_total,
        bytes_loaded,
        speed: (!speeds.is_empty()).then(|| speeds.iter().sum()),
        eta: links.iter().filter_map(|link| link.eta).filter(|eta| *eta >= 0).max(),
        status,
        finished: !links.is_empty() && links.iter().all(|link| link.finished),
        running: links.iter().any(|link| link.running),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(total: Option<i64>, loaded: i64, finished: bool) -> DownloadLink {
        DownloadLink {
            name: Some("part".into()),
            bytes_total: total,
            bytes_loaded: loaded,
            finished,
            ..DownloadLink::default()
        }
    }

    #[test]
    fn totals_require_every_link() {
        let known = aggregate(&[link(Some(100), 40, false), link(Some(50), 50, true)]);
        assert_eq!(known.bytes_total, Some(150));
        assert_eq!(known.bytes_loaded, 90);
        assert!(!known.finished);
        assert_eq!(known.name, None);

        let partial = aggregate(&[link(Some(100), 40, false), link(None, 0, false)]);
        assert_eq!(partial.bytes_total, None);
    }

    #[test]
    fn unfinished_status_wins() {
        let mut failed = link(Some(10), 0, false);
        failed.status = Some("File not found".into());
        let mut done = link(Some(10), 10, true);
        done.status = Some("Finished".into());
        let raw = aggregate(&[done, failed]);
        assert_eq!(raw.status.as_deref(), Some("File not found"));
    }

    #[test]
    fn empty_package_is_not_finished() {
        let raw = aggregate(&[]);
        assert!(!raw.finished);
        assert_eq!(raw.speed, None);
    }

    #[test]
    fn envelope_tolerates_null_data() {
        let parsed: Envelope<Vec<CollectedLink>> =
            serde_json::from_str(r#"{"data":null}"#).expect("parse envelope");
        assert!(parsed.data.is_none());
        let parsed: Envelope<CollectingJob> =
            serde_json::from_str(r#"{"data":{"id":7}}"#).expect("parse job");
        assert_eq!(parsed.data.map(|job| job.id), Some(7));
    }
}
