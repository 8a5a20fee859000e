use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ManagerError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Thin wrapper around `reqwest` bound to one daemon address and API key.
#[derive(Clone)]
pub struct HttpClient {
    api_key: String,
    http: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ManagerError> {
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(ManagerError::Http)?;

        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ManagerError>
    where
        T: DeserializeOwned,
    {
        self.get_json_with_query(path, &(), None).await
    }

    /// GET `path` with `query`; `timeout` overrides the client default, for long polls.
    pub async fn get_json_with_query<T, Q>(
        &self,
        path: &str,
        query: &Q,
        timeout: Option<Duration>,
    ) -> Result<T, ManagerError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.http.get(self.url(path)).query(query);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = self.send(path, request).await?;
        response.json::<T>().await.map_err(ManagerError::Http)
    }

    pub async fn post_with_query<Q>(&self, path: &str, query: &Q) -> Result<(), ManagerError>
    where
        Q: Serialize + ?Sized,
    {
        let request = self.http.post(self.url(path)).query(query);
        self.send(path, request).await?;
        Ok(())
    }

    /// Unauthenticated GET used while waiting for the daemon to come up.
    pub async fn get_noauth(&self, path: &str) -> Result<(), ManagerError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(ManagerError::Http)?;
        if !response.status().is_success() {
            return Err(ManagerError::Syncthing(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }
        Ok(())
    }

    async fn send(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ManagerError> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(ManagerError::Http)?;

        if !response.status().is_success() {
            return Err(ManagerError::Syncthing(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        Ok(response)
    }
}
