//! HTTP client for semindex-service

use semindex_core::query::{QueryOptions, QueryResult};
use semindex_core::{RunSummary, SemIndexError};
use serde::{Deserialize, Serialize};

pub struct ServiceClient {
    base_url: String,
    client: reqwest::blocking::Client,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    codebase_path: &'a str,
}

#[derive(Serialize, Default)]
struct IndexRequest {
    full: bool,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    collection: &'a str,
    query: &'a str,
    options: QueryOptions,
}

#[derive(Deserialize)]
struct ErrorEnvelopeWire {
    code: String,
    message: String,
    hint: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub schema_version: u32,
    pub points_count: u64,
    pub last_indexed_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub collections_registered: usize,
}

impl ServiceClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
            api_key,
        }
    }

    /// Idempotently register a codebase path under a collection name.
    /// A `collection_exists` response from the service is treated as success.
    pub fn register_collection(
        &self,
        name: &str,
        codebase_path: &str,
    ) -> Result<(), SemIndexError> {
        let url = format!("{}/collections", self.base_url);
        let req = RegisterRequest { name, codebase_path };
        match self.send::<serde_json::Value>(self.client.post(&url).json(&req)) {
            Ok(_) => Ok(()),
            Err(SemIndexError::ServiceError { code, .. }) if code == "collection_exists" => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn index(&self, name: &str, full: bool) -> Result<RunSummary, SemIndexError> {
        let url = format!("{}/collections/{}/index", self.base_url, name);
        self.send(self.client.post(&url).json(&IndexRequest { full }))
    }

    pub fn query(
        &self,
        collection: &str,
        query: &str,
        options: QueryOptions,
    ) -> Result<Vec<QueryResult>, SemIndexError> {
        let url = format!("{}/query", self.base_url);
        let req = QueryRequest { collection, query, options };
        self.send(self.client.post(&url).json(&req))
    }

    pub fn collection_status(&self, name: &str) -> Result<CollectionStatus, SemIndexError> {
        let url = format!("{}/collections/{}/status", self.base_url, name);
        self.send(self.client.get(&url))
    }

    pub fn service_status(&self) -> Result<ServiceStatus, SemIndexError> {
        let url = format!("{}/status", self.base_url);
        self.send(self.client.get(&url))
    }

    fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<T, SemIndexError> {
        let builder = match &self.api_key {
            Some(key) => builder.header("x-api-key", key.as_str()),
            None => builder,
        };
        let resp = builder.send().map_err(|e| SemIndexError::ServiceError {
            code: "connection_error".to_string(),
            message: e.to_string(),
            hint: "Is semindex-service running?".to_string(),
        })?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp));
        }

        resp.json::<T>().map_err(|e| SemIndexError::ServiceError {
            code: "parse_error".to_string(),
            message: e.to_string(),
            hint: "Unexpected response from service".to_string(),
        })
    }

    fn error_from_response(&self, resp: reqwest::blocking::Response) -> SemIndexError {
        let status = resp.status();
        match resp.json::<ErrorEnvelopeWire>() {
            Ok(envelope) => SemIndexError::ServiceError {
                code: envelope.code,
                message: envelope.message,
                hint: envelope.hint,
            },
            Err(_) => SemIndexError::ServiceError {
                code: format!("http_{}", status.as_u16()),
                message: format!("HTTP {status} from service"),
                hint: "Check service logs".to_string(),
            },
        }
    }
}

/// Check if a service error has a specific error code.
pub fn is_error_code(err: &SemIndexError, code: &str) -> bool {
    matches!(err, SemIndexError::ServiceError { code: c, .. } if c == code)
}
