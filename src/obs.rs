//! Minimal obs-websocket (protocol v5) client.
//!
//! Only the handshake and the handful of requests the overlay needs are
//! implemented. Every round trip is bounded by the configured call timeout.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::{future::Future, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace};

use crate::{
    config::{FolderRefresh, ObsConfig, OverlaySource, SourceKind},
    overlay::{ControlSession, Controller},
};

const RPC_VERSION: u32 = 1;
const REFRESH_BUTTON: &str = "refreshnocache";

const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("authentication rejected by {url}: {reason}")]
    Auth { url: String, reason: String },

    #[error("source \"{element}\" not found in scene \"{container}\"")]
    NotFound { element: String, container: String },

    #[error("{request} failed with code {code}: {comment}")]
    Request {
        request: String,
        code: i64,
        comment: String,
    },

    #[error("\"{name}\" is a {kind:?} and cannot be {action}")]
    WrongKind {
        name: String,
        kind: SourceKind,
        action: &'static str,
    },

    #[error("input \"{input}\" has no url setting to re-apply")]
    NoUrl { input: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("session already closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] tungstenite::Error),

    #[error("unexpected message: {0}")]
    Protocol(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    op: u8,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    #[serde(default)]
    obs_web_socket_version: Option<String>,
    #[serde(default)]
    authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
struct AuthChallenge {
    challenge: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Value,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    result: bool,
    code: i64,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub source_name: String,
    pub scene_item_id: i64,
}

/// The `authentication` string expected by `Identify`:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    future: impl Future<Output = Result<T, ControlError>>,
) -> Result<T, ControlError> {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| {
            Err(ControlError::Timeout {
                operation: operation.to_string(),
                timeout,
            })
        })
}

/// Opens one [`ObsSession`] per reload action.
pub struct ObsController {
    config: ObsConfig,
    timeout: Duration,
    folder_refresh: FolderRefresh,
}

impl ObsController {
    pub fn new(config: ObsConfig, timeout: Duration, folder_refresh: FolderRefresh) -> Self {
        Self {
            config,
            timeout,
            folder_refresh,
        }
    }
}

#[async_trait]
impl Controller for ObsController {
    type Session = ObsSession;

    async fn connect(&self) -> Result<ObsSession, ControlError> {
        info!(url = %self.config.url, "Connecting to OBS");
        let mut session = ObsSession::connect(
            &self.config.url,
            self.config.password.as_deref(),
            self.timeout,
        )
        .await?;
        session.folder_refresh = self.folder_refresh;
        info!("Connected");
        Ok(session)
    }
}

/// An identified obs-websocket connection.
pub struct ObsSession {
    socket: Option<Socket>,
    timeout: Duration,
    next_request_id: u64,
    folder_refresh: FolderRefresh,
}

impl ObsSession {
    pub async fn connect(
        url: &str,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let socket = bounded("connect", timeout, handshake(url, password)).await?;
        Ok(Self {
            socket: Some(socket),
            timeout,
            next_request_id: 1,
            folder_refresh: FolderRefresh::default(),
        })
    }

    /// Sends one request and waits for its response, skipping events and
    /// responses to other requests.
    pub async fn request(
        &mut self,
        request_type: &str,
        data: Value,
    ) -> Result<Value, ControlError> {
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;
        let timeout = self.timeout;
        let socket = self.socket.as_mut().ok_or(ControlError::Closed)?;

        bounded(
            request_type,
            timeout,
            exchange(socket, request_type, request_id, data),
        )
        .await
    }

    pub async fn scene_items(&mut self, scene: &str) -> Result<Vec<SceneItem>, ControlError> {
        let data = self
            .request("GetSceneItemList", json!({ "sceneName": scene }))
            .await?;
        let items = data.get("sceneItems").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(items).map_err(|err| ControlError::Protocol(err.to_string()))
    }

    pub async fn set_scene_item_enabled(
        &mut self,
        scene: &str,
        item_id: i64,
        enabled: bool,
    ) -> Result<(), ControlError> {
        self.request(
            "SetSceneItemEnabled",
            json!({
                "sceneName": scene,
                "sceneItemId": item_id,
                "sceneItemEnabled": enabled,
            }),
        )
        .await
        .map(|_| ())
    }

    pub async fn input_settings(&mut self, input: &str) -> Result<Value, ControlError> {
        let data = self
            .request("GetInputSettings", json!({ "inputName": input }))
            .await?;
        Ok(data.get("inputSettings").cloned().unwrap_or(Value::Null))
    }

    pub async fn set_input_settings(
        &mut self,
        input: &str,
        settings: Value,
    ) -> Result<(), ControlError> {
        self.request(
            "SetInputSettings",
            json!({
                "inputName": input,
                "inputSettings": settings,
                "overlay": true,
            }),
        )
        .await
        .map(|_| ())
    }

    pub async fn press_input_button(
        &mut self,
        input: &str,
        property: &str,
    ) -> Result<(), ControlError> {
        self.request(
            "PressInputPropertiesButton",
            json!({ "inputName": input, "propertyName": property }),
        )
        .await
        .map(|_| ())
    }

    /// Re-applies the input's current `url` setting, which makes a browser
    /// source reload its page.
    async fn reapply_url(&mut self, input: &str) -> Result<(), ControlError> {
        let settings = self.input_settings(input).await?;
        let url = settings
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ControlError::NoUrl {
                input: input.to_string(),
            })?
            .to_string();
        self.set_input_settings(input, json!({ "url": url })).await
    }
}

#[async_trait]
impl ControlSession for ObsSession {
    async fn set_visible(
        &mut self,
        source: &OverlaySource,
        visible: bool,
    ) -> Result<(), ControlError> {
        if !source.is_direct() {
            return Err(ControlError::WrongKind {
                name: source.name.clone(),
                kind: source.kind,
                action: "toggled",
            });
        }

        let items = self.scene_items(&source.scene_name).await?;
        let item = items
            .iter()
            .find(|item| item.source_name == source.name)
            .ok_or_else(|| ControlError::NotFound {
                element: source.name.clone(),
                container: source.scene_name.clone(),
            })?;

        info!(
            source = %source.name,
            scene = %source.scene_name,
            "Toggling to {}",
            if visible { "visible" } else { "hidden" }
        );
        self.set_scene_item_enabled(&source.scene_name, item.scene_item_id, visible)
            .await
    }

    async fn refresh_container(&mut self, source: &OverlaySource) -> Result<(), ControlError> {
        if source.is_direct() {
            return Err(ControlError::WrongKind {
                name: source.name.clone(),
                kind: source.kind,
                action: "refreshed",
            });
        }

        info!(source = %source.name, "Refreshing folder source");
        match self.folder_refresh {
            FolderRefresh::Button => self.press_input_button(&source.name, REFRESH_BUTTON).await,
            FolderRefresh::Settings => self.reapply_url(&source.name).await,
        }
    }

    async fn close(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        match tokio::time::timeout(self.timeout, socket.close(None)).await {
            Ok(Ok(())) => debug!("Disconnected from OBS"),
            Ok(Err(err)) => debug!(error = %err, "Error while closing OBS session"),
            Err(_) => debug!("Timed out closing OBS session"),
        }
    }
}

async fn handshake(url: &str, password: Option<&str>) -> Result<Socket, ControlError> {
    let connect_error = |reason: String| ControlError::Connect {
        url: url.to_string(),
        reason,
    };

    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|err| connect_error(err.to_string()))?;

    let envelope = next_envelope(&mut socket)
        .await
        .map_err(|err| connect_error(err.to_string()))?;
    if envelope.op != OP_HELLO {
        return Err(ControlError::Protocol(format!(
            "expected Hello, got op {}",
            envelope.op
        )));
    }
    let hello: Hello = serde_json::from_value(envelope.d)
        .map_err(|err| ControlError::Protocol(err.to_string()))?;
    debug!(version = ?hello.obs_web_socket_version, "OBS hello");

    let mut identify = json!({ "rpcVersion": RPC_VERSION, "eventSubscriptions": 0 });
    let authenticating = hello.authentication.is_some();
    if let Some(challenge) = hello.authentication {
        let password = password.ok_or_else(|| ControlError::Auth {
            url: url.to_string(),
            reason: "server requires a password but none is configured".to_string(),
        })?;
        identify["authentication"] =
            Value::String(auth_response(password, &challenge.salt, &challenge.challenge));
    }
    socket
        .send(Message::Text(
            json!({ "op": OP_IDENTIFY, "d": identify }).to_string(),
        ))
        .await?;

    match next_envelope(&mut socket).await {
        Ok(envelope) if envelope.op == OP_IDENTIFIED => Ok(socket),
        Ok(envelope) => Err(ControlError::Protocol(format!(
            "expected Identified, got op {}",
            envelope.op
        ))),
        Err(err) if authenticating => Err(ControlError::Auth {
            url: url.to_string(),
            reason: err.to_string(),
        }),
        Err(err) => Err(connect_error(err.to_string())),
    }
}

async fn exchange(
    socket: &mut Socket,
    request_type: &str,
    request_id: String,
    data: Value,
) -> Result<Value, ControlError> {
    let payload = json!({
        "op": OP_REQUEST,
        "d": {
            "requestType": request_type,
            "requestId": request_id,
            "requestData": data,
        },
    });
    trace!(%payload, "obs request");
    socket.send(Message::Text(payload.to_string())).await?;

    loop {
        let envelope = next_envelope(socket).await?;
        if envelope.op != OP_REQUEST_RESPONSE {
            continue;
        }
        let response: RequestResponse = serde_json::from_value(envelope.d)
            .map_err(|err| ControlError::Protocol(err.to_string()))?;
        if response.request_id != request_id {
            continue;
        }
        if !response.request_status.result {
            return Err(ControlError::Request {
                request: request_type.to_string(),
                code: response.request_status.code,
                comment: response.request_status.comment.unwrap_or_default(),
            });
        }
        return Ok(response.response_data);
    }
}

/// Reads until the next JSON text frame. A close frame or the end of the
/// stream is reported as a protocol error carrying the close reason.
async fn next_envelope(socket: &mut Socket) -> Result<Envelope, ControlError> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => {
                trace!(%text, "obs message");
                return serde_json::from_str(&text)
                    .map_err(|err| ControlError::Protocol(err.to_string()));
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|frame| format!("closed with {} {}", u16::from(frame.code), frame.reason))
                    .unwrap_or_else(|| "closed".to_string());
                return Err(ControlError::Protocol(reason));
            }
            _ => {}
        }
    }
    Err(ControlError::Protocol("connection closed".to_string()))
}
