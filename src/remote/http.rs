//! HTTP remote client for Google-style REST APIs.
//!
//! Resources live at `{base}/v1/{remote_id}`. Mutations may answer with a
//! long-running operation (any body carrying a `done` field), which is then
//! polled at `{base}/v1/{operation}`. Documents use snake_case keys locally
//! and lowerCamelCase on the wire.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ConvergentError, RemoteError, Result};
use crate::state::Document;

use super::client::{Mutation, OperationFault, OperationStatus, RemoteClient, ResourceRef};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// API version segment.
const API_VERSION: &str = "v1";

/// Keys whose object values are user data and keep their keys verbatim.
const OPAQUE_KEYS: &[&str] = &["labels", "terraform_labels", "terraformLabels"];

/// HTTP remote client.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    /// HTTP client.
    client: Client,
    /// Base URL without the version segment.
    base_url: String,
    /// Bearer token.
    token: Option<String>,
}

impl HttpRemoteClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API_VERSION}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request and returns the status and parsed JSON body.
    async fn execute(&self, request: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;

        trace!(status = status.as_u16(), body = %text, "Remote response");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })?
        };

        Ok((status, body))
    }

    /// Converts an unsuccessful response into a typed error.
    fn status_error(status: StatusCode, body: &Value, resource: &str, kind: &str) -> ConvergentError {
        let message = extract_error(body);
        let canonical = body["error"]["status"].as_str().unwrap_or_default();

        match status.as_u16() {
            404 => RemoteError::not_found(kind, resource).into(),
            409 => RemoteError::RemoteConflict { message }.into(),
            _ if canonical == "ABORTED" => RemoteError::RemoteConflict { message }.into(),
            401 => RemoteError::AuthenticationFailed { message }.into(),
            429 => RemoteError::network(format!("rate limited: {message}")).into(),
            code if status.is_server_error() => {
                RemoteError::network(format!("server error {code}: {message}")).into()
            }
            code => RemoteError::rejected(code, message).into(),
        }
    }

    /// Interprets a mutation response.
    fn mutation(body: &Value) -> Result<Mutation> {
        let Some(done) = body.get("done") else {
            return Ok(Mutation::Completed);
        };

        let status = parse_operation(body)?;
        if done.as_bool().unwrap_or(false) {
            return match status.error {
                Some(fault) => Err(fault.into_error()),
                None => Ok(Mutation::Completed),
            };
        }
        Ok(Mutation::Pending {
            operation: status.name,
        })
    }

    async fn mutate(&self, request: RequestBuilder, resource: &ResourceRef) -> Result<Mutation> {
        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body, &resource.remote_id, &resource.kind));
        }
        Self::mutation(&body)
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(&self, resource: &ResourceRef, body: &Document) -> Result<Mutation> {
        let (parent, collection, leaf) = resource.split()?;
        let path = if parent.is_empty() {
            collection.to_string()
        } else {
            format!("{parent}/{collection}")
        };

        let mut request = self
            .client
            .post(self.url(&path))
            .json(&to_wire(body.to_value()));
        if let Some(param) = &resource.create_id_param {
            request = request.query(&[(param.as_str(), leaf)]);
        }

        debug!(remote_id = %resource.remote_id, "POST create");
        self.mutate(request, resource).await
    }

    async fn read(&self, resource: &ResourceRef) -> Result<Option<Document>> {
        debug!(remote_id = %resource.remote_id, "GET");
        let (status, body) = self
            .execute(self.client.get(self.url(&resource.remote_id)))
            .await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::status_error(status, &body, &resource.remote_id, &resource.kind));
        }

        Document::try_from(from_wire(body))
            .map(Some)
            .map_err(|message| RemoteError::InvalidResponse { message }.into())
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        patch: &Document,
        update_mask: &[String],
    ) -> Result<Mutation> {
        let mask = update_mask
            .iter()
            .map(|path| {
                path.split('.')
                    .map(snake_to_camel)
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .collect::<Vec<_>>()
            .join(",");

        debug!(remote_id = %resource.remote_id, update_mask = %mask, "PATCH update");
        let request = self
            .client
            .patch(self.url(&resource.remote_id))
            .query(&[("updateMask", mask.as_str())])
            .json(&to_wire(patch.to_value()));
        self.mutate(request, resource).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Mutation> {
        debug!(remote_id = %resource.remote_id, "DELETE");
        let request = self.client.delete(self.url(&resource.remote_id));
        self.mutate(request, resource).await
    }

    async fn poll_operation(&self, operation: &str) -> Result<OperationStatus> {
        let (status, body) = self.execute(self.client.get(self.url(operation))).await?;
        if !status.is_success() {
            return Err(Self::status_error(status, &body, operation, "operation"));
        }
        parse_operation(&body)
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

/// Parses an operation body.
fn parse_operation(body: &Value) -> Result<OperationStatus> {
    let name = body["name"].as_str().ok_or_else(|| RemoteError::InvalidResponse {
        message: String::from("operation has no name"),
    })?;

    let error = body.get("error").filter(|e| !e.is_null()).map(|e| OperationFault {
        code: e["code"].as_i64().unwrap_or_default(),
        status: e["status"].as_str().unwrap_or("UNKNOWN").to_string(),
        message: e["message"].as_str().unwrap_or("unknown error").to_string(),
    });

    Ok(OperationStatus {
        name: name.to_string(),
        done: body["done"].as_bool().unwrap_or(false),
        error,
    })
}

/// Converts an `{"error": {...}}` envelope into a readable message.
///
/// `ErrorInfo` details contribute their reason and `BadRequest` details their
/// field violations.
#[must_use]
pub fn extract_error(body: &Value) -> String {
    let err = &body["error"];
    let status = err["status"].as_str().unwrap_or("UNKNOWN");
    let message = err["message"].as_str().unwrap_or("unknown error");

    let mut parts: Vec<String> = Vec::new();
    if let Some(details) = err["details"].as_array() {
        for detail in details {
            if let Some(reason) = detail["reason"].as_str() {
                parts.push(reason.to_string());
            }
            if let Some(violations) = detail["fieldViolations"].as_array() {
                for v in violations {
                    let field = v["field"].as_str().unwrap_or("?");
                    let description = v["description"].as_str().unwrap_or("invalid");
                    parts.push(format!("field '{field}': {description}"));
                }
            }
        }
    }

    if parts.is_empty() {
        format!("{status}: {message}")
    } else {
        format!("{status}: {message} ({})", parts.join("; "))
    }
}

fn to_wire(value: Value) -> Value {
    rename_keys(value, snake_to_camel)
}

fn from_wire(value: Value) -> Value {
    rename_keys(value, camel_to_snake)
}

fn rename_keys(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let value = if OPAQUE_KEYS.contains(&key.as_str()) {
                        value
                    } else {
                        rename_keys(value, rename)
                    };
                    (rename(&key), value)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect()),
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
