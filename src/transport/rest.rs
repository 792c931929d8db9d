//! RouterOS v7 REST backend.
//!
//! Menus map onto `https://host:port/rest/<path>`: GET reads, PUT creates,
//! PATCH edits by `.id`, DELETE removes, and POST runs commands such as
//! `/ppp/aaa/set`.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::row::{Row, device_key, normalize_row, to_device_row};
use super::{AddReport, RouterTransport, TransportError, menus};
use async_trait::async_trait;

pub struct RestTransport {
    client: reqwest::Client,
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl RestTransport {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Protocol(format!("http client setup: {e}")))?;
        Ok(Self {
            client,
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "https://{}:{}/rest/{}",
            self.host,
            self.port,
            path.trim_start_matches('/')
        )
    }

    fn map_request_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connection {
                host: self.host.clone(),
                port: self.port,
                reason: err.to_string(),
            }
        } else {
            TransportError::Protocol(err.to_string())
        }
    }

    fn check_auth(&self, status: StatusCode) -> Result<(), TransportError> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Authentication {
                host: self.host.clone(),
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        self.check_auth(response.status())?;
        Ok(response)
    }
}

#[async_trait]
impl RouterTransport for RestTransport {
    async fn check_connectivity(&self) -> Result<(), TransportError> {
        let response = self
            .send(self.client.get(self.url(menus::SYSTEM_IDENTITY)))
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Protocol(format!(
                "identity probe answered {status}"
            )))
        }
    }

    async fn get_rows(&self, menu: &str, filter: &Row) -> Result<Vec<Row>, TransportError> {
        let query: Vec<(String, String)> = filter
            .iter()
            .map(|(k, v)| (device_key(k), v.clone()))
            .collect();
        let response = self
            .send(self.client.get(self.url(menu)).query(&query))
            .await?;
        if !response.status().is_success() {
            debug!(menu, status = %response.status(), "read rejected, treating as empty");
            return Ok(Vec::new());
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("malformed response body: {e}")))?;
        Ok(rows_from_json(&body))
    }

    async fn add_rows(&self, menu: &str, rows: &[Row]) -> Result<AddReport, TransportError> {
        let mut report = AddReport::default();
        for row in rows {
            let body = json_from_row(&to_device_row(row));
            let response = self.send(self.client.put(self.url(menu)).json(&body)).await?;
            let status = response.status();
            if status.is_success() {
                report.created += 1;
            } else {
                report.record_error(format!("{menu}: {}", error_detail(response, status).await));
            }
        }
        Ok(report)
    }

    async fn edit_row(
        &self,
        menu: &str,
        current: &Row,
        changes: &Row,
    ) -> Result<bool, TransportError> {
        let Some(id) = current.get(".id") else {
            return Ok(false);
        };
        let url = format!("{}/{}", self.url(menu), id);
        let body = json_from_row(&to_device_row(changes));
        let response = self.send(self.client.patch(url).json(&body)).await?;
        Ok(response.status().is_success())
    }

    async fn remove_rows(&self, menu: &str, filter: &Row) -> Result<u64, TransportError> {
        let mut removed = 0;
        for row in self.get_rows(menu, filter).await? {
            let Some(id) = row.get(".id") else { continue };
            let url = format!("{}/{}", self.url(menu), id);
            let response = self.send(self.client.delete(url)).await?;
            if response.status().is_success() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exec_command(
        &self,
        command: &str,
        args: &Row,
    ) -> Result<Option<Vec<Row>>, TransportError> {
        let body = json_from_row(&to_device_row(args));
        let response = self
            .send(self.client.post(self.url(command)).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            debug!(command, %status, "command rejected");
            return Ok(None);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(Some(rows_from_json(&body)))
    }
}

fn rows_from_json(value: &Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|obj| normalize_row(row_from_object(obj)))
            .collect(),
        Value::Object(obj) => vec![normalize_row(row_from_object(obj))],
        _ => Vec::new(),
    }
}

fn row_from_object(obj: &serde_json::Map<String, Value>) -> Row {
    obj.iter()
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_from_row(row: &Row) -> Value {
    Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

async fn error_detail(response: reqwest::Response, status: StatusCode) -> String {
    match response.json::<Value>().await.ok() {
        Some(Value::Object(obj)) => obj
            .get("detail")
            .or_else(|| obj.get("message"))
            .map(value_to_string)
            .unwrap_or_else(|| status.to_string()),
        _ => status.to_string(),
    }
}
