//! Minimal HTTP gateway (webhook + health check).
//! Zero new dependencies: raw TCP + tokio.
//!
//! The LINE platform retries any non-2xx answer, so after a request has
//! passed signature verification the webhook always acknowledges with
//! 200; handler problems are logged and notified, never surfaced.

use crate::bot::{Command, ControlSurface, SharedState};
use crate::channels::Notifier;
use crate::channels::line::{self, LineClient, UserRegistry, WebhookEvent};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Everything a webhook request needs, shared across connection tasks.
pub struct GatewayContext {
    pub control: ControlSurface,
    pub line: Arc<LineClient>,
    pub users: Arc<UserRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub state: SharedState,
    pub channel_secret: String,
    pub webhook_path: String,
}

pub struct Gateway {
    listener: TcpListener,
}

impl Gateway {
    /// Bind the listener. Port 0 asks the OS for a free port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(format!("{host}:{port}")).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until the process exits.
    pub async fn run(self, ctx: Arc<GatewayContext>) -> Result<()> {
        let addr = self.listener.local_addr()?;
        println!("🤖 liverelay gateway listening on http://{addr}");
        println!("  POST {}  — LINE webhook (signed)", ctx.webhook_path);
        println!("  GET  /health        — health check");
        println!("  Press Ctrl+C to stop.\n");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let ctx = ctx.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &ctx).await {
                    tracing::debug!("connection from {peer} dropped: {e}");
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: &GatewayContext) -> Result<()> {
    let request = match tokio::time::timeout(Duration::from_secs(30), read_request(&mut stream))
        .await
    {
        Ok(Ok(Some(request))) => request,
        // Timeout or empty connection: nothing to answer.
        _ => return Ok(()),
    };
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    let [method, path, ..] = parts.as_slice() else {
        send_response(&mut stream, 400, "Bad Request").await?;
        return Ok(());
    };
    tracing::debug!("{method} {path}");

    match (*method, *path) {
        ("GET", "/health") => {
            let (running, persona) = {
                let st = ctx.state.lock();
                (st.is_running, st.current_persona.clone())
            };
            let body = serde_json::json!({
                "status": "ok",
                "running": running,
                "persona": persona,
            });
            send_json(&mut stream, 200, &body).await?;
        }

        ("POST", path) if path == ctx.webhook_path => {
            handle_line_webhook(&mut stream, &request, ctx).await?;
        }

        _ => {
            let body = serde_json::json!({
                "error": "Not found",
                "routes": [format!("POST {}", ctx.webhook_path), "GET /health"]
            });
            send_json(&mut stream, 404, &body).await?;
        }
    }

    Ok(())
}

async fn handle_line_webhook(
    stream: &mut TcpStream,
    request: &str,
    ctx: &GatewayContext,
) -> Result<()> {
    let signature = extract_header(request, "x-line-signature").unwrap_or("");
    let body = request
        .split("\r\n\r\n")
        .nth(1)
        .or_else(|| request.split("\n\n").nth(1))
        .unwrap_or("");

    if !line::verify_signature(&ctx.channel_secret, signature, body.as_bytes()) {
        tracing::warn!("webhook rejected — invalid or missing x-line-signature");
        send_response(stream, 400, "invalid signature").await?;
        return Ok(());
    }

    for event in line::parse_webhook_events(body) {
        match event {
            WebhookEvent::Follow { user_id } => {
                match ctx.users.record(&user_id) {
                    Ok(true) => {
                        ctx.notifier
                            .notify(&format!("New follower registered: {user_id}"))
                            .await;
                    }
                    Ok(false) => {
                        tracing::debug!(user_id = %user_id, "follower already registered");
                    }
                    Err(e) => tracing::warn!("failed to record follower: {e}"),
                }
            }
            WebhookEvent::Text { reply_token, text } => {
                let ack = ctx.control.handle_command(Command::parse(&text)).await;
                if let Err(e) = ctx.line.reply(&reply_token, &ack).await {
                    tracing::warn!("failed to acknowledge command: {e}");
                }
            }
            WebhookEvent::Other => {
                tracing::debug!("ignoring unhandled webhook event");
            }
        }
    }

    // Acknowledge; anything but 200 makes the platform retry the delivery.
    send_response(stream, 200, "OK").await?;
    Ok(())
}

/// Read one HTTP request, continuing past the first segment until the
/// Content-Length is satisfied. 64KB cap; larger requests are truncated.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= 65_536 {
            break;
        }

        let request = String::from_utf8_lossy(&buf);
        let Some(header_end) = request.find("\r\n\r\n") else {
            continue;
        };
        let body_len = buf.len() - (header_end + 4);
        let expected = extract_header(&request, "content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if body_len >= expected {
            break;
        }
    }

    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Extract a header value from a raw HTTP request.
fn extract_header<'a>(request: &'a str, header_name: &str) -> Option<&'a str> {
    let lower_name = header_name.to_lowercase();
    for line in request.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().to_lowercase() == lower_name {
                return Some(value.trim());
            }
        }
    }
    None
}

async fn send_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await
}

async fn send_json(
    stream: &mut TcpStream,
    status: u16,
    body: &serde_json::Value,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let json = serde_json::to_string(body).unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{json}",
        json.len()
    );
    stream.write_all(response.as_bytes()).await
}
