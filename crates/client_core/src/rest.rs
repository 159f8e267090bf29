//! HTTP adapter for the hosted backend's row and object endpoints.

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Response};
use serde_json::Value;
use shared::error::ApiError;
use tracing::debug;
use url::Url;

use crate::{
    backend::{Filter, ObjectStore, RowQuery, RowStore, StoredObject},
    error::{ClientError, ClientResult},
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct RestBackend {
    http: Client,
    base: Url,
    api_key: String,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str) -> ClientResult<Self> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|err| ClientError::Config(format!("invalid backend url '{base_url}': {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base,
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, collection: &str) -> ClientResult<Url> {
        self.base
            .join(&format!("rest/v1/{collection}"))
            .map_err(|err| ClientError::query(collection, err))
    }

    fn object_url(&self, prefix: &str, bucket: &str, key: &str) -> Result<Url, String> {
        let mut url = self.base.join(prefix).map_err(|err| err.to_string())?;
        url.path_segments_mut()
            .map_err(|_| "backend url cannot carry a path".to_string())?
            .pop_if_empty()
            .push(bucket)
            .push(key);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

pub fn query_params(query: &RowQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.select.replace(' ', ""))];
    for filter in &query.filters {
        let value = match filter {
            Filter::Eq { value, .. } => format!("eq.{value}"),
            Filter::ILike { pattern, .. } => format!("ilike.{}", pattern.replace('%', "*")),
        };
        params.push((filter.column().to_string(), value));
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{direction}", order.column)));
    }
    if query.offset > 0 {
        params.push(("offset".into(), query.offset.to_string()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

async fn checked(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_response(status.as_u16(), &body))
}

#[async_trait]
impl RowStore for RestBackend {
    async fn query(&self, collection: &str, query: &RowQuery) -> ClientResult<Vec<Value>> {
        let url = self.table_url(collection)?;
        let params = query_params(query);
        debug!(collection, ?params, "row query");
        let response = self
            .authorized(self.http.get(url))
            .query(&params)
            .send()
            .await
            .map_err(|err| ClientError::query(collection, err))?;
        checked(response)
            .await
            .map_err(|err| ClientError::query(collection, ClientError::api_reason(&err)))?
            .json()
            .await
            .map_err(|err| ClientError::malformed(collection, err))
    }

    async fn insert(&self, collection: &str, record: Value) -> ClientResult<Value> {
        let url = self.table_url(collection)?;
        let response = self
            .authorized(self.http.post(url))
            .header("Prefer", "return=representation")
            .json(&[record])
            .send()
            .await
            .map_err(|err| ClientError::insert(collection, err))?;
        let rows: Vec<Value> = checked(response)
            .await
            .map_err(|err| ClientError::insert(collection, ClientError::api_reason(&err)))?
            .json()
            .await
            .map_err(|err| ClientError::malformed(collection, err))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::insert(collection, "no row returned"))
    }

    async fn update(&self, collection: &str, filter: &Filter, patch: Value) -> ClientResult<()> {
        let url = self.table_url(collection)?;
        let params: Vec<(String, String)> = query_params(&RowQuery::select("*").filter(filter.clone()))
            .into_iter()
            .filter(|(key, _)| key != "select")
            .collect();
        let response = self
            .authorized(self.http.patch(url))
            .header("Prefer", "return=minimal")
            .query(&params)
            .json(&patch)
            .send()
            .await
            .map_err(|err| ClientError::update(collection, err))?;
        checked(response)
            .await
            .map_err(|err| ClientError::update(collection, ClientError::api_reason(&err)))?;
        Ok(())
    }

    async fn point_fetch(&self, collection: &str, id: &str, select: &str) -> ClientResult<Value> {
        let query = RowQuery::select(select)
            .filter(Filter::eq("id", id))
            .range(0, 1);
        self.query(collection, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ClientResult<StoredObject> {
        let url = self
            .object_url("storage/v1/object/", bucket, key)
            .map_err(|reason| ClientError::upload(bucket, key, reason))?;
        let size = bytes.len();
        let response = self
            .authorized(self.http.post(url))
            .header(CONTENT_TYPE, content_type.unwrap_or(DEFAULT_CONTENT_TYPE))
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|err| ClientError::upload(bucket, key, err))?;
        checked(response)
            .await
            .map_err(|err| ClientError::upload(bucket, key, ClientError::api_reason(&err)))?;
        debug!(bucket, key, size, "object stored");
        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> ClientResult<String> {
        self.object_url("storage/v1/object/public/", bucket, key)
            .map(String::from)
            .map_err(|reason| ClientError::upload(bucket, key, reason))
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
