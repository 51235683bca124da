//! Application catalog: which apps, versions and profiles can be streamed.

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use kitstream_common::{ApplicationEntry, ApplicationProfile, ApplicationVersion, CatalogListing};

use crate::backend::BackendError;

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: String,
    token: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub async fn list_applications(&self) -> Result<Vec<ApplicationEntry>, BackendError> {
        self.fetch(format!("{}/cfg/apps", self.base_url)).await
    }

    pub async fn list_versions(
        &self,
        app_id: &str,
    ) -> Result<Vec<ApplicationVersion>, BackendError> {
        self.fetch(format!("{}/cfg/apps/{}/versions", self.base_url, app_id))
            .await
    }

    pub async fn list_profiles(
        &self,
        app_id: &str,
        version: &str,
    ) -> Result<Vec<ApplicationProfile>, BackendError> {
        self.fetch(format!(
            "{}/cfg/apps/{}/versions/{}/profiles",
            self.base_url, app_id, version
        ))
        .await
    }

    async fn fetch<T>(&self, url: String) -> Result<Vec<T>, BackendError>
    where
        T: DeserializeOwned,
    {
        debug!(%url, "fetching catalog");
        let mut request = self.http.get(url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let res = request.send().await?;

        if res.status().is_success() {
            Ok(res.json::<CatalogListing<T>>().await?.into_items())
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(BackendError::UnexpectedStatus { status, body })
        }
    }
}
