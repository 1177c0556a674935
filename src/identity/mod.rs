//! Supabase identity mirror over the PostgREST interface.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use tracing::{info, warn};

use crate::config::Supabase;

pub mod model;

pub use model::IdentityProfile;
use model::UpsertedRow;

/// Mirrors user identity into the relational store and returns its row id.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn sync_user(&self, profile: &IdentityProfile) -> Result<String>;
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    service_key: String,
    table: String,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.base_url)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(base_url: Url, service_key: String, table: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tg-progress/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            service_key,
            table,
        })
    }

    pub fn from_config(cfg: &Supabase) -> Result<Self> {
        let base_url = Url::parse(&cfg.url).context("invalid supabase.url")?;
        Self::new(base_url, cfg.service_key.clone(), cfg.table.clone())
    }

    pub fn build_upsert_request(&self, profile: &IdentityProfile) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join(&format!("rest/v1/{}", self.table))
            .context("invalid Supabase base URL")?;
        endpoint
            .query_pairs_mut()
            .append_pair("on_conflict", "telegram_id");
        self.http
            .post(endpoint)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[profile])
            .build()
            .context("failed to build Supabase request")
    }

    async fn upsert(&self, profile: &IdentityProfile) -> Result<String> {
        let request = self.build_upsert_request(profile)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Supabase")?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by Supabase: {}", body);
            return Err(anyhow!("received 429 from Supabase: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "Supabase upsert failed: {}", body);
            return Err(anyhow!("supabase error {}: {}", status, body));
        }

        let rows: Vec<UpsertedRow> = res
            .json()
            .await
            .context("invalid Supabase response JSON")?;
        let id = rows
            .first()
            .and_then(UpsertedRow::id_string)
            .ok_or_else(|| anyhow!("Supabase returned no row id"))?;
        info!(telegram_id = profile.telegram_id, external_id = %id, "identity synced");
        Ok(id)
    }
}

#[async_trait]
impl IdentityService for SupabaseClient {
    async fn sync_user(&self, profile: &IdentityProfile) -> Result<String> {
        self.upsert(profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        SupabaseClient::from_config(&Supabase {
            url: "https://demo.supabase.co".into(),
            service_key: "service-key".into(),
            table: "profiles".into(),
        })
        .unwrap()
    }

    fn profile() -> IdentityProfile {
        IdentityProfile {
            telegram_id: 42,
            username: Some("ada".into()),
            first_name: "Ada".into(),
            last_name: None,
            language_code: Some("en".into()),
        }
    }

    #[test]
    fn upsert_request_targets_table_with_headers() {
        let request = client().build_upsert_request(&profile()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/profiles");
        assert_eq!(request.url().query(), Some("on_conflict=telegram_id"));
        let headers = request.headers();
        let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok()).unwrap().to_string();
        assert_eq!(header("apikey"), "service-key");
        assert_eq!(header("Authorization"), "Bearer service-key");
        assert_eq!(
            header("Prefer"),
            "resolution=merge-duplicates,return=representation"
        );
    }

    #[test]
    fn upsert_body_is_a_single_row_array() {
        let request = client().build_upsert_request(&profile()).unwrap();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json[0]["telegram_id"], 42);
        assert_eq!(json[0]["first_name"], "Ada");
    }

    #[test]
    fn row_ids_accept_uuid_or_number() {
        let row: UpsertedRow = serde_json::from_str(r#"{"id":"8f7c"}"#).unwrap();
        assert_eq!(row.id_string().as_deref(), Some("8f7c"));
        let row: UpsertedRow = serde_json::from_str(r#"{"id":17}"#).unwrap();
        assert_eq!(row.id_string().as_deref(), Some("17"));
        let row: UpsertedRow = serde_json::from_str(r#"{"id":null}"#).unwrap();
        assert_eq!(row.id_string(), None);
    }
}
