use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.classbox.live/";
pub const DEFAULT_CDN_BASE: &str = "https://vod.classbox.live/";

/// Endpoint layout of one Classbox deployment.
///
/// All URL construction lives here so that tests can point a client at a
/// local mock server.
#[derive(Debug, Clone)]
pub struct Api {
    base: Url,
    cdn: Url,
}

impl Api {
    pub fn new(base: Url, cdn: Url) -> Self {
        Self { base, cdn }
    }

    /// The playback-analytics call whose response carries the policy grant.
    pub fn watch_analytics_url(&self) -> Url {
        self.base.join("v2/analytics/watch").unwrap()
    }

    pub fn otp_url(&self, encoded_key: &str, device_id: &str) -> Url {
        let mut url = self.base.join("v2/drm/otp").unwrap();
        url.query_pairs_mut()
            .append_pair("key", encoded_key)
            .append_pair("deviceId", device_id);
        url
    }

    /// Manifest URL without the signed query, as reported to analytics.
    pub fn canonical_manifest_url(&self, asset_id: &str) -> Url {
        self.cdn.join(&format!("{asset_id}/master.mpd")).unwrap()
    }

    /// Manifest URL carrying the decrypted policy grant as its query.
    pub fn signed_manifest_url(&self, asset_id: &str, signed_query: &str) -> Url {
        let mut url = self.canonical_manifest_url(asset_id);
        url.set_query(Some(signed_query));
        url
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base: Url::parse(DEFAULT_API_BASE).unwrap(),
            cdn: Url::parse(DEFAULT_CDN_BASE).unwrap(),
        }
    }
}
