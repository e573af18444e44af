// file: src/persistence/rest.rs
//
// Client for a hosted PostgREST-style data store: one endpoint per table,
// filters as `column=eq.value` query parameters.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use url::Url;

use super::{Persistence, OWNER_FIELD};
use crate::error::PersistenceError;
use crate::http_config::HttpConfig;
use crate::models::ListQuery;

#[derive(Clone)]
pub struct RestPersistence {
    client: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl RestPersistence {
    pub fn new(base_url: &str, api_key: impl Into<String>, config: &HttpConfig) -> Result<Self, PersistenceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PersistenceError::validation(format!("Invalid data store URL '{}': {}", base_url, e)))?;
        Ok(Self {
            client: config.build_client()?,
            base_url,
            api_key: api_key.into(),
            access_token: None,
        })
    }

    /// Authenticate requests as a signed-in user instead of with the anonymous key.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn table_url(&self, table: &str) -> Result<Url, PersistenceError> {
        self.base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| PersistenceError::validation(format!("Invalid table name '{}': {}", table, e)))
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Prefer", "return=representation")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, PersistenceError> {
        let response = self.request(builder).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<Value>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PersistenceError::from_status(status.as_u16(), body))
}

/// Query parameters selecting one owner's row by id.
pub fn row_params(id: &str, owner_id: &str) -> Vec<(String, String)> {
    vec![
        ("id".to_string(), format!("eq.{}", id)),
        (OWNER_FIELD.to_string(), format!("eq.{}", owner_id)),
    ]
}

/// Query parameters for a `list` call.
pub fn list_params(owner_id: &str, query: &ListQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("select".to_string(), "*".to_string()),
        (OWNER_FIELD.to_string(), format!("eq.{}", owner_id)),
    ];
    for filter in &query.filters {
        let value = match &filter.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        params.push((filter.field.clone(), format!("eq.{}", value)));
    }
    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|order| format!("{}.{}", order.field, if order.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    params
}

/// Representation responses are arrays; single-row writes return one element.
fn single_row(body: Value, what: &str) -> Result<Value, PersistenceError> {
    match body {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        Value::Array(_) => Err(PersistenceError::not_found(what.to_string())),
        row @ Value::Object(_) => Ok(row),
        other => Err(PersistenceError::Decode(format!("unexpected response body: {}", other))),
    }
}

#[async_trait]
impl Persistence for RestPersistence {
    async fn insert(&self, table: &str, owner_id: &str, mut row: Value) -> Result<Value, PersistenceError> {
        let Value::Object(fields) = &mut row else {
            return Err(PersistenceError::validation("rows must be JSON objects"));
        };
        fields.insert(OWNER_FIELD.to_string(), Value::String(owner_id.to_string()));

        let url = self.table_url(table)?;
        debug!("[REST] POST {}", url);
        let body = self.send(self.client.post(url).json(&row)).await?;
        single_row(body, table)
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Value) -> Result<Value, PersistenceError> {
        let url = self.table_url(table)?;
        debug!("[REST] PATCH {} id={}", url, id);
        let body = self
            .send(self.client.patch(url).query(&row_params(id, owner_id)).json(&patch))
            .await?;
        // An empty representation means no row matched the filters
        single_row(body, &format!("{} {}", table, id))
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), PersistenceError> {
        let url = self.table_url(table)?;
        debug!("[REST] DELETE {} id={}", url, id);
        let response = self
            .request(self.client.delete(url).query(&row_params(id, owner_id)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn list(&self, table: &str, owner_id: &str, query: &ListQuery) -> Result<Vec<Value>, PersistenceError> {
        let url = self.table_url(table)?;
        debug!("[REST] GET {}", url);
        let body = self
            .send(self.client.get(url).query(&list_params(owner_id, query)))
            .await?;
        match body {
            Value::Array(rows) => Ok(rows),
            other => Err(PersistenceError::Decode(format!("expected an array of rows, got {}", other))),
        }
    }
}
