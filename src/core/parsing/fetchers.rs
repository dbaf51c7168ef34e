use crate::core::models::account::Account;
use anyhow::{Error, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Stored request and imp json, keyed by id. Ids that were
/// not found are simply absent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoredData {
    pub requests: HashMap<String, Value>,
    pub imps: HashMap<String, Value>,
}

#[async_trait]
pub trait StoredRequestFetcher: Send + Sync {
    async fn fetch_requests(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<StoredData, Error>;
}

#[async_trait]
pub trait StoredResponseFetcher: Send + Sync {
    async fn fetch_responses(&self, ids: &[String]) -> Result<HashMap<String, Value>, Error>;
}

#[async_trait]
pub trait AccountFetcher: Send + Sync {
    async fn fetch_account(&self, account_id: &str) -> Result<Option<Account>, Error>;
}

/// Fetcher for slots the host leaves unconfigured, it never finds anything
pub struct EmptyFetcher;

#[async_trait]
impl StoredRequestFetcher for EmptyFetcher {
    async fn fetch_requests(&self, _: &[String], _: &[String]) -> Result<StoredData, Error> {
        Ok(StoredData::default())
    }
}

#[async_trait]
impl StoredResponseFetcher for EmptyFetcher {
    async fn fetch_responses(&self, _: &[String]) -> Result<HashMap<String, Value>, Error> {
        Ok(HashMap::new())
    }
}

#[async_trait]
impl AccountFetcher for EmptyFetcher {
    async fn fetch_account(&self, _: &str) -> Result<Option<Account>, Error> {
        Ok(None)
    }
}

fn pick(source: &HashMap<String, Value>, ids: &[String]) -> HashMap<String, Value> {
    ids.iter()
        .filter_map(|id| source.get(id).map(|v| (id.clone(), v.clone())))
        .collect()
}

/// Stored data held in memory, typically loaded from the config file
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    pub requests: HashMap<String, Value>,
    pub imps: HashMap<String, Value>,
    pub responses: HashMap<String, Value>,
}

#[async_trait]
impl StoredRequestFetcher for MemoryFetcher {
    async fn fetch_requests(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<StoredData, Error> {
        Ok(StoredData {
            requests: pick(&self.requests, request_ids),
            imps: pick(&self.imps, imp_ids),
        })
    }
}

#[async_trait]
impl StoredResponseFetcher for MemoryFetcher {
    async fn fetch_responses(&self, ids: &[String]) -> Result<HashMap<String, Value>, Error> {
        Ok(pick(&self.responses, ids))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAccountFetcher {
    accounts: HashMap<String, Account>,
}

impl MemoryAccountFetcher {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }
}

#[async_trait]
impl AccountFetcher for MemoryAccountFetcher {
    async fn fetch_account(&self, account_id: &str) -> Result<Option<Account>, Error> {
        Ok(self.accounts.get(account_id).cloned())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredResponsesPayload {
    responses: HashMap<String, Value>,
}

fn stored_data_url(endpoint: &Url, params: &[(&str, &[String])]) -> Result<Url, Error> {
    let mut url = endpoint.clone();

    {
        let mut query = url.query_pairs_mut();
        for (key, ids) in params {
            if ids.is_empty() {
                continue;
            }

            query.append_pair(key, &serde_json::to_string(ids)?);
        }
    }

    Ok(url)
}

/// Fetches stored data from a remote http service, e.g.
/// `GET {endpoint}?request-ids=["a"]&imp-ids=["b"]` answering
/// with `{"requests": {...}, "imps": {...}}`
pub struct HttpFetcher {
    client: Client,
    endpoint: Url,
}

impl HttpFetcher {
    pub fn new(client: Client, endpoint: &str) -> Result<Self, Error> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| anyhow!("invalid stored data endpoint: {}", e))?;

        Ok(Self { client, endpoint })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("Fetching stored data from {}", url);

        let res = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow!("stored data request to {} failed: {}", url, e))?
            .error_for_status()?;

        let bytes = res.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| anyhow!("malformed stored data from {}: {}", url, e))
    }
}

#[async_trait]
impl StoredRequestFetcher for HttpFetcher {
    async fn fetch_requests(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<StoredData, Error> {
        if request_ids.is_empty() && imp_ids.is_empty() {
            return Ok(StoredData::default());
        }

        let url = stored_data_url(
            &self.endpoint,
            &[("request-ids", request_ids), ("imp-ids", imp_ids)],
        )?;
        self.get(url).await
    }
}

#[async_trait]
impl StoredResponseFetcher for HttpFetcher {
    async fn fetch_responses(&self, ids: &[String]) -> Result<HashMap<String, Value>, Error> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = stored_data_url(&self.endpoint, &[("resp-ids", ids)])?;
        let payload: StoredResponsesPayload = self.get(url).await?;

        Ok(payload.responses)
    }
}
