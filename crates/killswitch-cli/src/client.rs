use anyhow::Context;
use std::io::{BufRead, BufReader};

/// How requests identify themselves to the server: the principal header
/// name and the proxy token, when the server requires one.
#[derive(Debug, Clone)]
pub struct Identity {
    pub header: String,
    pub token: Option<String>,
}

/// Blocking HTTP client for a running kill-switch server.
pub struct Client {
    base: String,
    identity: Identity,
    agent: ureq::Agent,
}

impl Client {
    pub fn new(base: &str, identity: Identity) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            identity,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Request with the proxy token attached; every route but `/health`
    /// rejects a token-protected call without it.
    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let req = self.agent.request(method, &self.url(path));
        match &self.identity.token {
            Some(token) => req.set("authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    fn as_principal(&self, req: ureq::Request, principal: &str) -> ureq::Request {
        req.set(&self.identity.header, principal)
    }

    pub fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let result = self.request("GET", path).call();
        self.read_json(result)
    }

    pub fn post(
        &self,
        path: &str,
        principal: &str,
        body: Option<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let req = self.as_principal(self.request("POST", path), principal);
        let result = match body {
            Some(json) => req.send_json(json),
            None => req.call(),
        };
        self.read_json(result)
    }

    pub fn put(
        &self,
        path: &str,
        principal: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let result = self
            .as_principal(self.request("PUT", path), principal)
            .send_json(body);
        self.read_json(result)
    }

    /// Follow an SSE stream, calling `on_event(event, data)` per frame until
    /// the server closes the stream or `on_event` returns `false`.
    pub fn stream<F>(&self, path: &str, mut on_event: F) -> anyhow::Result<()>
    where
        F: FnMut(&str, &str) -> anyhow::Result<bool>,
    {
        let response = self
            .request("GET", path)
            .set("accept", "text/event-stream")
            .call()
            .map_err(|e| self.describe(e))?;
        let reader = BufReader::new(response.into_reader());

        let mut event = String::new();
        let mut data = String::new();
        for line in reader.lines() {
            let line = line.context("reading event stream")?;
            if line.is_empty() {
                if !data.is_empty() && !on_event(&event, &data)? {
                    return Ok(());
                }
                event.clear();
                data.clear();
            } else if let Some(v) = line.strip_prefix("event:") {
                event = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(v.trim_start());
            }
        }
        Ok(())
    }

    fn read_json(
        &self,
        result: Result<ureq::Response, ureq::Error>,
    ) -> anyhow::Result<serde_json::Value> {
        let response = result.map_err(|e| self.describe(e))?;
        response
            .into_json()
            .context("server returned a non-JSON body")
    }

    fn describe(&self, err: ureq::Error) -> anyhow::Error {
        match err {
            ureq::Error::Status(code, response) => {
                let body: serde_json::Value = response.into_json().unwrap_or_default();
                server_error(code, &body)
            }
            ureq::Error::Transport(t) => {
                anyhow::anyhow!("cannot reach kill-switch server at {}: {t}", self.base)
            }
        }
    }
}

/// `{error, detail}` body to a one-line error.
fn server_error(code: u16, body: &serde_json::Value) -> anyhow::Error {
    let kind = body["error"].as_str().unwrap_or("Error");
    match body["detail"].as_str() {
        Some(detail) => anyhow::anyhow!("{kind} ({code}): {detail}"),
        None => anyhow::anyhow!("{kind} ({code})"),
    }
}
