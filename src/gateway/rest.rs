//! RouterOS v7 REST API client
//!
//! Talks to `https://<router>/rest/...` with HTTP basic auth. RouterOS
//! reports every field as a string, so records are decoded into wire structs
//! here and converted to the engine's [`PppSecret`] / [`SimpleQueue`] types.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::{
    ActiveSession, InterfaceTraffic, PppSecret, QueuePatch, RouterGateway, RouterSession,
    SecretPatch, SimpleQueue,
};
use crate::error::{Error, Result};
use crate::model::{Router, RouterId};

/// Gateway opening REST sessions with a bounded per-request timeout
#[derive(Clone, Debug)]
pub struct RouterOsGateway {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl RouterOsGateway {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Self {
        Self {
            timeout,
            accept_invalid_certs,
        }
    }
}

impl Default for RouterOsGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), true)
    }
}

#[async_trait]
impl RouterGateway for RouterOsGateway {
    #[instrument(skip(self, router), fields(router = %router.id))]
    async fn open(&self, router: &Router) -> Result<Box<dyn RouterSession>> {
        // Routers ship self-signed certificates unless the operator installed one.
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .user_agent(concat!("mikrotik-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        let session = RestSession {
            client,
            base_url: format!("{}/rest", router.endpoint.trim_end_matches('/')),
            username: router.username.clone(),
            password: router.password.clone(),
            router_id: router.id.clone(),
        };

        // Probe so that bad credentials or a dead router fail at open time
        session.call(Method::GET, "/system/identity", None).await?;
        debug!("Opened RouterOS session to {}", router.endpoint);

        Ok(Box::new(session))
    }
}

struct RestSession {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    router_id: RouterId,
}

#[derive(Debug, Deserialize)]
struct SecretRecord {
    #[serde(rename = ".id")]
    id: String,
    name: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    disabled: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueRecord {
    #[serde(rename = ".id")]
    id: String,
    name: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(rename = "max-limit", default)]
    max_limit: Option<String>,
    #[serde(default)]
    disabled: Option<String>,
    /// Set on queues RouterOS creates itself, e.g. `<pppoe-u1>`
    #[serde(default)]
    dynamic: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActiveRecord {
    #[serde(rename = ".id")]
    id: String,
    name: String,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrafficRecord {
    name: String,
    #[serde(rename = "rx-bits-per-second", default)]
    rx_bits_per_second: Option<String>,
    #[serde(rename = "tx-bits-per-second", default)]
    tx_bits_per_second: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("yes"))
}

fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl From<SecretRecord> for PppSecret {
    fn from(r: SecretRecord) -> Self {
        PppSecret {
            disabled: parse_flag(r.disabled.as_deref()),
            id: Some(r.id),
            name: r.name,
            password: r.password,
            profile: r.profile.unwrap_or_else(|| "default".to_string()),
            service: r.service.unwrap_or_else(|| "any".to_string()),
            comment: r.comment,
        }
    }
}

impl From<QueueRecord> for SimpleQueue {
    fn from(r: QueueRecord) -> Self {
        SimpleQueue {
            disabled: parse_flag(r.disabled.as_deref()),
            id: Some(r.id),
            name: r.name,
            target: r.target.unwrap_or_default(),
            max_limit: r.max_limit.unwrap_or_else(|| "0/0".to_string()),
            comment: r.comment,
        }
    }
}

impl RestSession {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.check(response).await
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.detail.or(b.message))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::RouterApi {
                status: status.as_u16(),
                message: format!("authentication rejected by router {}", self.router_id),
            });
        }

        Err(Error::RouterApi {
            status: status.as_u16(),
            message,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_connect() || e.is_timeout() {
            Error::RouterUnavailable {
                router: self.router_id.to_string(),
                message: e.to_string(),
            }
        } else {
            Error::HttpError(e)
        }
    }

    async fn list<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let response = self.call(Method::GET, path, None).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    /// List filtered by `name`; the name goes through query encoding
    async fn list_named<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        name: &str,
    ) -> Result<Vec<T>> {
        let response = self
            .request(Method::GET, path)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }
}

fn secret_body(secret: &PppSecret) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), json!(secret.name));
    body.insert("profile".into(), json!(secret.profile));
    body.insert("service".into(), json!(secret.service));
    body.insert("disabled".into(), json!(flag(secret.disabled)));
    if let Some(password) = &secret.password {
        body.insert("password".into(), json!(password));
    }
    if let Some(comment) = &secret.comment {
        body.insert("comment".into(), json!(comment));
    }
    Value::Object(body)
}

fn secret_patch_body(patch: &SecretPatch) -> Value {
    let mut body = Map::new();
    if let Some(profile) = &patch.profile {
        body.insert("profile".into(), json!(profile));
    }
    if let Some(password) = &patch.password {
        body.insert("password".into(), json!(password));
    }
    if let Some(disabled) = patch.disabled {
        body.insert("disabled".into(), json!(flag(disabled)));
    }
    if let Some(comment) = &patch.comment {
        body.insert("comment".into(), json!(comment));
    }
    Value::Object(body)
}

fn queue_body(queue: &SimpleQueue) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), json!(queue.name));
    body.insert("target".into(), json!(queue.target));
    body.insert("max-limit".into(), json!(queue.max_limit));
    body.insert("disabled".into(), json!(flag(queue.disabled)));
    if let Some(comment) = &queue.comment {
        body.insert("comment".into(), json!(comment));
    }
    Value::Object(body)
}

fn queue_patch_body(patch: &QueuePatch) -> Value {
    let mut body = Map::new();
    if let Some(target) = &patch.target {
        body.insert("target".into(), json!(target));
    }
    if let Some(max_limit) = &patch.max_limit {
        body.insert("max-limit".into(), json!(max_limit));
    }
    if let Some(disabled) = patch.disabled {
        body.insert("disabled".into(), json!(flag(disabled)));
    }
    if let Some(comment) = &patch.comment {
        body.insert("comment".into(), json!(comment));
    }
    Value::Object(body)
}

#[async_trait]
impl RouterSession for RestSession {
    async fn list_secrets(&self) -> Result<Vec<PppSecret>> {
        let records: Vec<SecretRecord> = self.list("/ppp/secret").await?;
        Ok(records.into_iter().map(PppSecret::from).collect())
    }

    async fn find_secret(&self, name: &str) -> Result<Option<PppSecret>> {
        let records: Vec<SecretRecord> = self.list_named("/ppp/secret", name).await?;
        Ok(records
            .into_iter()
            .map(PppSecret::from)
            .find(|s| s.name == name))
    }

    async fn add_secret(&self, secret: &PppSecret) -> Result<()> {
        self.call(Method::PUT, "/ppp/secret", Some(secret_body(secret)))
            .await?;
        Ok(())
    }

    async fn set_secret(&self, id: &str, patch: &SecretPatch) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/ppp/secret/{id}"),
            Some(secret_patch_body(patch)),
        )
        .await?;
        Ok(())
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        self.call(Method::DELETE, &format!("/ppp/secret/{id}"), None)
            .await?;
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<SimpleQueue>> {
        let records: Vec<QueueRecord> = self.list("/queue/simple").await?;
        Ok(records
            .into_iter()
            .filter(|r| !parse_flag(r.dynamic.as_deref()))
            .map(SimpleQueue::from)
            .collect())
    }

    async fn find_queue(&self, name: &str) -> Result<Option<SimpleQueue>> {
        let records: Vec<QueueRecord> = self.list_named("/queue/simple", name).await?;
        Ok(records
            .into_iter()
            .map(SimpleQueue::from)
            .find(|q| q.name == name))
    }

    async fn add_queue(&self, queue: &SimpleQueue) -> Result<()> {
        self.call(Method::PUT, "/queue/simple", Some(queue_body(queue)))
            .await?;
        Ok(())
    }

    async fn set_queue(&self, id: &str, patch: &QueuePatch) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/queue/simple/{id}"),
            Some(queue_patch_body(patch)),
        )
        .await?;
        Ok(())
    }

    async fn remove_queue(&self, id: &str) -> Result<()> {
        self.call(Method::DELETE, &format!("/queue/simple/{id}"), None)
            .await?;
        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<ActiveSession>> {
        let records: Vec<ActiveRecord> = self.list("/ppp/active").await?;
        Ok(records
            .into_iter()
            .map(|r| ActiveSession {
                id: r.id,
                name: r.name,
                address: r.address,
            })
            .collect())
    }

    async fn find_active_sessions(&self, name: &str) -> Result<Vec<ActiveSession>> {
        let records: Vec<ActiveRecord> = self.list_named("/ppp/active", name).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.name == name)
            .map(|r| ActiveSession {
                id: r.id,
                name: r.name,
                address: r.address,
            })
            .collect())
    }

    async fn remove_active_session(&self, id: &str) -> Result<()> {
        match self
            .call(Method::DELETE, &format!("/ppp/active/{id}"), None)
            .await
        {
            // Session dropped on its own between list and remove
            Err(Error::RouterApi { status: 404, .. }) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn interface_traffic(&self, interface: &str) -> Result<InterfaceTraffic> {
        let response = self
            .call(
                Method::POST,
                "/interface/monitor-traffic",
                Some(json!({ "interface": interface, "once": "" })),
            )
            .await?;
        let records: Vec<TrafficRecord> =
            response.json().await.map_err(|e| self.transport_error(e))?;
        let record = records
            .into_iter()
            .find(|r| r.name == interface)
            .ok_or_else(|| Error::ObjectMissing {
                kind: "interface",
                name: interface.to_string(),
            })?;

        Ok(InterfaceTraffic {
            interface: record.name,
            rx_bits_per_second: record
                .rx_bits_per_second
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            tx_bits_per_second: record
                .tx_bits_per_second
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn close(&self) {
        // REST is connectionless from RouterOS' point of view; dropping the
        // client releases pooled sockets.
        debug!("Closed RouterOS session to router {}", self.router_id);
    }
}
