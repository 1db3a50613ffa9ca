use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::signing::{percent_encode_component, percent_encode_path};
use super::{validate_key, ObjectStore, ObjectStoreError, PresignedUrl};

const GCS_HOST: &str = "storage.googleapis.com";

/// V4 signed URLs cannot outlive seven days.
const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    bucket: String,
    client: Client,
    access_token: tokio::sync::RwLock<CachedToken>,
    service_account: Option<ServiceAccountKey>,
}

#[derive(Default)]
struct CachedToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl GcsStore {
    pub async fn new(bucket: &str, credentials_file: Option<&str>) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let service_account = match credentials_file {
            Some(path) => {
                let key_json = tokio::fs::read_to_string(path).await?;
                Some(serde_json::from_str::<ServiceAccountKey>(&key_json)?)
            }
            None => None,
        };

        let store = Self {
            bucket: bucket.to_string(),
            client,
            access_token: tokio::sync::RwLock::new(CachedToken::default()),
            service_account,
        };

        store.refresh_token().await?;
        Ok(store)
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let resp = if let Some(ref key) = self.service_account {
            self.token_from_service_account(key).await?
        } else {
            self.token_from_metadata_server().await?
        };

        // Refresh a minute early so in-flight requests never carry a stale token.
        let expires_at = resp
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs - 60));

        let mut lock = self.access_token.write().await;
        *lock = CachedToken {
            token: resp.access_token.clone(),
            expires_at,
        };
        Ok(resp.access_token)
    }

    async fn token(&self) -> Result<String, ObjectStoreError> {
        {
            let cached = self.access_token.read().await;
            let fresh = cached.expires_at.map_or(true, |at| Utc::now() < at);
            if fresh && !cached.token.is_empty() {
                return Ok(cached.token.clone());
            }
        }

        self.refresh_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("GCS token refresh failed: {e}")))
    }

    async fn token_from_service_account(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, anyhow::Error> {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // Build JWT (header.claims.signature)
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(resp)
    }

    async fn token_from_metadata_server(&self) -> Result<TokenResponse, anyhow::Error> {
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .json()
            .await?;

        Ok(resp)
    }

    fn upload_url_for(&self, key: &str) -> String {
        format!(
            "https://{GCS_HOST}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            percent_encode_component(key)
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "https://{GCS_HOST}/storage/v1/b/{}/o/{}?alt=media",
            self.bucket,
            percent_encode_component(key)
        )
    }

    fn metadata_url(&self, key: &str) -> String {
        format!(
            "https://{GCS_HOST}/storage/v1/b/{}/o/{}",
            self.bucket,
            percent_encode_component(key)
        )
    }

    /// Produce a V4 (`GOOG4-RSA-SHA256`) signed URL for `method` on `key`.
    fn signed_url(
        &self,
        method: &'static str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        validate_key(key)?;
        let account = self.service_account.as_ref().ok_or_else(|| {
            ObjectStoreError::Signing("signed URLs require GCS_CREDENTIALS_FILE".to_string())
        })?;

        let ttl = ttl.min(MAX_SIGNED_URL_TTL);
        let now = Utc::now();
        let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/auto/storage/goog4_request");
        let credential = format!("{}/{}", account.client_email, scope);
        let canonical_uri = format!("/{}/{}", self.bucket, percent_encode_path(key));

        let query = [
            ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
            ("X-Goog-Credential", credential),
            ("X-Goog-Date", datetime.clone()),
            ("X-Goog-Expires", ttl.as_secs().to_string()),
            ("X-Goog-SignedHeaders", "host".to_string()),
        ]
        .iter()
        .map(|(k, v)| format!("{k}={}", percent_encode_component(v)))
        .collect::<Vec<_>>()
        .join("&");

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{query}\nhost:{GCS_HOST}\n\nhost\nUNSIGNED-PAYLOAD"
        );
        let hashed = hex::encode(
            ring::digest::digest(&ring::digest::SHA256, canonical_request.as_bytes()).as_ref(),
        );
        let string_to_sign = format!("GOOG4-RSA-SHA256\n{datetime}\n{scope}\n{hashed}");

        let signature = sign_rs256(string_to_sign.as_bytes(), &account.private_key)
            .map_err(|e| ObjectStoreError::Signing(e.to_string()))?;

        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| ObjectStoreError::Signing(e.to_string()))?;

        Ok(PresignedUrl {
            url: format!(
                "https://{GCS_HOST}{canonical_uri}?{query}&X-Goog-Signature={}",
                hex::encode(&signature)
            ),
            method,
            expires_at,
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let token = self.token().await?;

        let resp = self
            .client
            .post(self.upload_url_for(key))
            .bearer_auth(&token)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS upload failed ({status}): {body}"
            )));
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS download failed ({status}): {body}"
            )));
        }

        let data = resp
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .delete(self.metadata_url(key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS delete failed ({status}): {body}"
            )));
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(self.metadata_url(key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Backend(format!(
                "GCS metadata lookup failed ({})",
                resp.status()
            )));
        }

        Ok(true)
    }

    async fn upload_url(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, ObjectStoreError> {
        self.signed_url("PUT", key, ttl)
    }

    async fn download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        self.signed_url("GET", key, ttl)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM headers and decode base64
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
