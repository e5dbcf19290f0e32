//! Wire types for the torrent client web API.

use haul_core::{TorrentRawStatus, TransferId};
use serde::Deserialize;

/// Prefix of the tag that ties a torrent to its transfer.
pub(crate) const TRACKING_TAG_PREFIX: &str = "haul-";

/// Entry returned by `GET /api/v2/torrents/info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct TorrentInfo {
    pub(crate) hash: String,
    pub(crate) name: String,
    pub(crate) state: String,
    pub(crate) progress: f64,
    pub(crate) size: i64,
    pub(crate) downloaded: i64,
    pub(crate) dlspeed: i64,
    pub(crate) eta: Option<i64>,
}

impl TorrentInfo {
    pub(crate) fn into_raw(self) -> TorrentRawStatus {
        TorrentRawStatus {
            name: (!self.name.is_empty()).then_some(self.name),
            state: self.state,
            progress: self.progress,
            size: u64::try_from(self.size).ok().filter(|size| *size > 0),
            downloaded: u64::try_from(self.downloaded).unwrap_or(0),
            dlspeed: u64::try_from(self.dlspeed).unwrap_or(0),
            eta: self.eta,
        }
    }
}

/// Tag attached to every torrent added for `id`.
pub(crate) fn tracking_tag(id: TransferId) -> String {
    format!("{TRACKING_TAG_PREFIX}{id}")
}

/// Extract a hex v1 info-hash from a magnet URI, lower-cased.
///
/// Base32 hashes are left for the client to resolve.
pub(crate) fn magnet_info_hash(source: &str) -> Option<String> {
    let query = source.strip_prefix("magnet:?")?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "xt")
        .find_map(|(_, value)| {
            let hash = value.strip_prefix("urn:btih:")?;
            (hash.len() == 40 && hash.chars().all(|ch| ch.is_ascii_hexdigit()))
                .then(|| hash.to_ascii_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_hex_hashes_only() {
        let hex = "magnet:?dn=ubuntu&xt=urn:btih:0123456789ABCDEF0123456789ABCDEF01234567&tr=x";
        assert_eq!(
            magnet_info_hash(hex).as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
        let base32 = "magnet:?xt=urn:btih:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U";
        assert_eq!(magnet_info_hash(base32), None);
        assert_eq!(magnet_info_hash("https://example.invalid/a.torrent"), None);
    }

    #[test]
    fn info_without_metadata_has_no_size() {
        let info: TorrentInfo = serde_json::from_str(
            r#"{"hash":"abc","name":"","state":"metaDL","progress":0,"size":-1,"eta":8640000}"#,
        )
        .expect("parse info");
        let raw = info.into_raw();
        assert_eq!(raw.size, None);
        assert_eq!(raw.name, None);
        assert_eq!(raw.state, "metaDL");
    }
}
