// REST data reference.
// One-shot GET of `{database_url}/{path}.json` against a realtime-database style endpoint.

use reqwest::{
    Client, StatusCode, Url,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FetchError, Result};

use super::{DataRef, Snapshot};

/// Connection settings for [`RestRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestConfig {
    /// Base URL of the database, e.g. `https://example.firebaseio.com`.
    pub database_url: String,
}

impl RestConfig {
    pub const ENV_VAR: &'static str = "REFHOOKS_DATABASE_URL";

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Read the database URL from `REFHOOKS_DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var(Self::ENV_VAR).map_err(|_| FetchError::MissingConfig(Self::ENV_VAR))?;
        Ok(Self::new(url))
    }

    /// Build the URL for reading `path`.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.database_url.trim_end_matches('/');
        let path = path.trim_matches('/');
        let raw = if path.is_empty() {
            format!("{}/.json", base)
        } else {
            format!("{}/{}.json", base, path)
        };

        let url =
            Url::parse(&raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {}",
                scheme
            ))),
        }
    }

    /// Build an HTTP client with the default headers.
    pub fn client(&self) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("refhooks"));

        Client::builder()
            .default_headers(headers)
            .build()
            .map_err(FetchError::Http)
    }
}

/// Reference to one path of a REST database.
#[derive(Debug, Clone)]
pub struct RestRef {
    client: Client,
    path: String,
    url: Url,
}

impl RestRef {
    /// Create a reference with its own client.
    pub fn new(config: &RestConfig, path: impl Into<String>) -> Result<Self> {
        Self::with_client(config, config.client()?, path)
    }

    /// Create a reference sharing an existing client.
    pub fn with_client(
        config: &RestConfig,
        client: Client,
        path: impl Into<String>,
    ) -> Result<Self> {
        let path = path.into().trim_matches('/').to_string();
        let url = config.url_for(&path)?;
        Ok(Self { client, path, url })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl DataRef for RestRef {
    /// The full read URL, so the same path on two databases differs.
    fn key(&self) -> &str {
        self.url.as_str()
    }

    async fn once(&self) -> Result<Snapshot> {
        tracing::debug!(path = %self.path, url = %self.url, "reading once");
        let response = self.client.get(self.url.clone()).send().await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await?;
                let value: Value = serde_json::from_slice(&body)?;
                Ok(Snapshot::new(&self.path, Some(value)))
            }
            StatusCode::NOT_FOUND => Ok(Snapshot::empty(&self.path)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FetchError::Denied(self.path.clone()))
            }
            status => Err(FetchError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
