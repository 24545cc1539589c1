//! Keybase chat integration.
//!
//! Messages go through a long-lived `keybase chat api` process, which speaks one
//! JSON request and one JSON response per line. The local Keybase client must
//! already be logged in; the relay never handles credentials itself.

use std::{process::Stdio, sync::Arc};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use tracing::{debug, info, instrument, warn};

use crate::base::{
    config::Config,
    types::{Res, Route, Void},
};

use super::{ChatClient, GenericChatClient};

// Extra methods on `ChatClient` applied by the keybase implementation.

impl ChatClient {
    /// Creates a new Keybase chat client.
    pub async fn keybase(config: &Config) -> Res<Self> {
        let client = KeybaseChatClient::new(config).await?;
        Ok(Self::new(Arc::new(client)))
    }
}

// Wire types.

/// Subset of `keybase status --json`.
#[derive(Debug, Deserialize)]
struct KeybaseStatus {
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "LoggedIn", default)]
    logged_in: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

// Structs.

/// A running `keybase chat api` process.
struct ApiSession {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ApiSession {
    fn spawn(location: &str) -> Res<Self> {
        let mut child = Command::new(location)
            .args(["chat", "api"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start `{location} chat api`"))?;

        let stdin = child.stdin.take().ok_or(anyhow!("Keybase chat api has no stdin"))?;
        let stdout = child.stdout.take().ok_or(anyhow!("Keybase chat api has no stdout"))?;

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn call(&mut self, request: &Value) -> Res<ApiResponse> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let response = self.stdout.next_line().await?.ok_or(anyhow!("Keybase chat api exited"))?;

        Ok(serde_json::from_str(&response)?)
    }
}

/// Keybase chat client implementation.
struct KeybaseChatClient {
    location: String,
    username: String,
    session: Mutex<Option<ApiSession>>,
}

impl KeybaseChatClient {
    /// Create a new Keybase chat client, verifying that the local client is logged in.
    #[instrument(name = "KeybaseChatClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let location = config.keybase_location.clone();

        let output = Command::new(&location)
            .args(["status", "--json"])
            .output()
            .await
            .with_context(|| format!("Failed to run `{location} status`"))?;

        if !output.status.success() {
            return Err(anyhow!("`{location} status` failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
        }

        let status: KeybaseStatus = serde_json::from_slice(&output.stdout).context("Failed to parse keybase status")?;

        if !status.logged_in {
            return Err(anyhow!("Keybase is not logged in; run `keybase login` first."));
        }

        info!("Keybase user: {}", status.username);

        let session = ApiSession::spawn(&location)?;

        Ok(Self {
            location,
            username: status.username,
            session: Mutex::new(Some(session)),
        })
    }
}

#[async_trait]
impl GenericChatClient for KeybaseChatClient {
    #[instrument(skip(self, body), fields(user = %self.username))]
    async fn send_message(&self, route: &Route, body: &str) -> Void {
        let request = send_request(route, body);

        let mut session = self.session.lock().await;

        let mut api = match session.take() {
            Some(api) => api,
            None => {
                debug!("Restarting keybase chat api ...");
                ApiSession::spawn(&self.location)?
            }
        };

        match api.call(&request).await {
            Ok(response) => {
                *session = Some(api);
                check_response(response)
            }
            Err(err) => {
                warn!("Keybase chat api session failed; it will be restarted on the next send.");
                Err(err.context("Failed to send message"))
            }
        }
    }
}

// Helpers.

/// Build the `send` request for a team conversation.
fn send_request(route: &Route, body: &str) -> Value {
    let mut channel = json!({
        "name": route.team,
        "members_type": "team",
    });

    if let Some(topic) = &route.channel {
        channel["topic_name"] = json!(topic);
    }

    json!({
        "method": "send",
        "params": {
            "options": {
                "channel": channel,
                "message": { "body": body },
            }
        }
    })
}

fn check_response(response: ApiResponse) -> Void {
    if let Some(error) = response.error {
        return Err(anyhow!("Keybase rejected message (code {}): {}", error.code, error.message));
    }

    if response.result.is_none() {
        return Err(anyhow!("Keybase returned an empty response"));
    }

    Ok(())
}

// Tests.
