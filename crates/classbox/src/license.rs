//! The Classbox license exchange.
//!
//! One viewing session walks four steps before any media byte is fetched:
//! the watch-analytics call returns an encrypted policy triple, the triple
//! decrypts into a CDN cookie grant plus a signed manifest query, the signed
//! manifest yields the `default_KID`, and the OTP endpoint trades an
//! obfuscated form of that KID for the content key.

use std::sync::LazyLock;

use fake_user_agent::get_chrome_rua;
use hikari::HttpClient;
use regex::Regex;
use reqwest::{header, Client, Response, StatusCode, Url};
use serde::Serialize;

use crate::api::Api;
use crate::error::{ClassboxError, ClassboxResult};
use crate::scramble;

static KID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"default_KID="([0-9a-fA-F-]+)""#).unwrap());

/// Credentials of one viewing session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bearer token of the logged-in account.
    pub token: String,
    /// Device identifier the account registered at login.
    pub device_id: String,
    /// Asset to acquire.
    pub asset_id: String,
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        device_id: impl Into<String>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            device_id: device_id.into(),
            asset_id: asset_id.into(),
        }
    }
}

/// CloudFront grant recovered from the watch policy.
#[derive(Debug, Clone, Serialize)]
pub struct SignedCookies {
    pub policy: String,
    pub signature: String,
    pub key_pair_id: String,
}

impl SignedCookies {
    /// Render the grant as a `Cookie` header value.
    pub fn cookie_string(&self) -> String {
        format!(
            "CloudFront-Policy={}; CloudFront-Signature={}; CloudFront-Key-Pair-Id={}",
            self.policy, self.signature, self.key_pair_id
        )
    }
}

/// Everything the download side needs for one asset.
#[derive(Debug, Clone)]
pub struct LicenseMaterial {
    pub asset_id: String,
    /// Key id from the manifest, hex with dashes removed.
    pub kid: String,
    /// Content key, hex of the same length as the kid.
    pub key: String,
    pub cookies: SignedCookies,
    /// Decrypted policy pairs under their original names, ready to use as a
    /// URL query.
    pub signed_query: String,
    pub manifest_url: Url,
    /// Manifest body fetched during the exchange. Track resolution reuses it
    /// instead of hitting the CDN again.
    pub manifest: String,
}

impl LicenseMaterial {
    pub fn cookie_string(&self) -> String {
        self.cookies.cookie_string()
    }
}

/// Split the raw policy into pairs and decrypt each value.
///
/// The endpoint is free to reorder the triple, so keys are matched by name.
/// Cookies rename them under the `CloudFront-` prefix while the returned
/// query string keeps the original names.
pub(crate) fn decrypt_policy(raw: &str) -> ClassboxResult<(SignedCookies, String)> {
    let mut policy = None;
    let mut signature = None;
    let mut key_pair_id = None;
    let mut query = Vec::new();

    for pair in raw.split('&') {
        let (key, value) = pair.split_once('=').ok_or(ClassboxError::PolicyShapeError)?;
        let value = scramble::decrypt_policy_value(value)?;
        match key {
            "Policy" => policy = Some(value.clone()),
            "Signature" => signature = Some(value.clone()),
            "Key-Pair-Id" => key_pair_id = Some(value.clone()),
            key => return Err(ClassboxError::UnexpectedPolicyKey(key.to_string())),
        }
        query.push(format!("{key}={value}"));
    }

    let cookies = SignedCookies {
        policy: policy.ok_or(ClassboxError::MissingPolicyKey("Policy"))?,
        signature: signature.ok_or(ClassboxError::MissingPolicyKey("Signature"))?,
        key_pair_id: key_pair_id.ok_or(ClassboxError::MissingPolicyKey("Key-Pair-Id"))?,
    };
    Ok((cookies, query.join("&")))
}

pub(crate) fn extract_kid(manifest: &str) -> ClassboxResult<String> {
    let kid = KID_REGEX
        .captures(manifest)
        .and_then(|captures| captures.get(1))
        .ok_or(ClassboxError::KidNotFound)?
        .as_str()
        .replace('-', "");
    if kid.len() != 32 {
        return Err(ClassboxError::InvalidKid(kid.len()));
    }
    Ok(kid)
}

pub struct LicenseClient {
    api: Api,
    client: HttpClient,
}

impl LicenseClient {
    pub fn new(api: Api) -> Self {
        let client = HttpClient::new(Client::builder().user_agent(get_chrome_rua()));
        Self { api, client }
    }

    pub fn with_client(api: Api, client: HttpClient) -> Self {
        Self { api, client }
    }

    /// Walk the full exchange for one session.
    pub async fn derive(&self, session: &Session) -> ClassboxResult<LicenseMaterial> {
        if session.token.is_empty() {
            return Err(ClassboxError::EmptyToken);
        }

        let raw_policy = self.fetch_policy(session).await?;
        let (cookies, signed_query) = decrypt_policy(&raw_policy)?;
        let manifest_url = self
            .api
            .signed_manifest_url(&session.asset_id, &signed_query);

        let manifest = self.fetch_manifest(&manifest_url, &cookies).await?;
        let kid = extract_kid(&manifest)?;
        let key = self.fetch_key(session, &kid).await?;
        if key.len() != kid.len() {
            return Err(ClassboxError::KeyLengthMismatch {
                kid: kid.len(),
                key: key.len(),
            });
        }

        log::info!("Derived content key for asset {}", session.asset_id);
        Ok(LicenseMaterial {
            asset_id: session.asset_id.clone(),
            kid,
            key,
            cookies,
            signed_query,
            manifest_url,
            manifest,
        })
    }

    async fn fetch_policy(&self, session: &Session) -> ClassboxResult<String> {
        let response = self
            .client
            .post(self.api.watch_analytics_url())
            .bearer_auth(&session.token)
            .json(&serde_json::json!({
                "url": self.api.canonical_manifest_url(&session.asset_id).as_str(),
                "deviceId": session.device_id,
            }))
            .send()
            .await?;
        let data: serde_json::Value = check_status("watch analytics", response)
            .await?
            .json()
            .await?;

        let policy = data["data"]["policy"]
            .as_str()
            .ok_or(ClassboxError::MissingField("data.policy"))?;
        Ok(policy.to_string())
    }

    async fn fetch_manifest(
        &self,
        manifest_url: &Url,
        cookies: &SignedCookies,
    ) -> ClassboxResult<String> {
        let response = self
            .client
            .get(manifest_url.clone())
            .header(header::COOKIE, cookies.cookie_string())
            .send()
            .await?;
        Ok(check_status("manifest", response).await?.text().await?)
    }

    async fn fetch_key(&self, session: &Session, kid: &str) -> ClassboxResult<String> {
        let encoded = scramble::encode_otp_key(kid, &session.token);
        let response = self
            .client
            .get(self.api.otp_url(&encoded, &session.device_id))
            .bearer_auth(&session.token)
            .send()
            .await?;
        let data: serde_json::Value = check_status("drm otp", response).await?.json().await?;

        let otp = data["data"]["otp"]
            .as_str()
            .ok_or(ClassboxError::MissingField("data.otp"))?;
        scramble::decode_otp(otp, &session.token)
    }
}

async fn check_status(what: &str, response: Response) -> ClassboxResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClassboxError::AuthError(status));
    }
    if !status.is_success() {
        log::warn!("Unexpected status {status} from {what} endpoint");
        return Err(ClassboxError::HttpError(status));
    }
    Ok(response)
}
