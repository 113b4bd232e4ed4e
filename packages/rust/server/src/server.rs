//! Static file server with optional live reload.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

use assetforge_shared::{CancelToken, ForgeError, Result};

use crate::http::{Request, content_type, read_request, resolve, write_response};
use crate::hub::ReloadHub;

/// Event-stream endpoint the injected client subscribes to.
pub const LIVERELOAD_PATH: &str = "/__livereload";

const CLIENT_SCRIPT: &str = concat!(
    "<script>(function(){",
    "var s=new EventSource(\"/__livereload\");",
    "s.addEventListener(\"reload\",function(){s.close();location.reload();});",
    "})();</script>"
);

// ---------------------------------------------------------------------------
// DevServer
// ---------------------------------------------------------------------------

pub struct DevServer {
    listener: TcpListener,
    root: PathBuf,
    hub: Option<ReloadHub>,
}

impl DevServer {
    /// Bind `addr` (e.g. `127.0.0.1:8000`). `hub` enables live reload.
    pub async fn bind(addr: &str, root: impl Into<PathBuf>, hub: Option<ReloadHub>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ForgeError::PortBind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            root: root.into(),
            hub,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ForgeError::io(&self.root, e))
    }

    /// Accept connections until `shutdown` fires.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn serve(self, shutdown: CancelToken) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, livereload = self.hub.is_some(), "dev server listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };

            let root = self.root.clone();
            let hub = self.hub.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = handle(stream, &root, hub.as_ref(), &shutdown).await {
                    debug!(%peer, error = %err, "connection ended with error");
                }
            });
        }

        info!("dev server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn handle(
    stream: TcpStream,
    root: &Path,
    hub: Option<&ReloadHub>,
    shutdown: &CancelToken,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let Some(request) = read_request(&mut reader).await? else {
        return write_response(&mut write, 400, "Bad Request", &[], b"bad request", true).await;
    };
    debug!(method = %request.method, path = %request.path, "request");

    let head_only = match request.method.as_str() {
        "GET" => false,
        "HEAD" => true,
        _ => {
            return write_response(
                &mut write,
                405,
                "Method Not Allowed",
                &[("Allow", "GET, HEAD")],
                b"method not allowed",
                true,
            )
            .await;
        }
    };

    if request.path == LIVERELOAD_PATH {
        if let Some(hub) = hub {
            return event_stream(reader, write, hub, shutdown).await;
        }
    }

    serve_file(&mut write, root, &request, hub.is_some(), head_only).await
}

async fn serve_file(
    write: &mut OwnedWriteHalf,
    root: &Path,
    request: &Request,
    livereload: bool,
    head_only: bool,
) -> std::io::Result<()> {
    let Some(mut path) = resolve(root, &request.path) else {
        return write_response(write, 403, "Forbidden", &[], b"forbidden", !head_only).await;
    };
    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push("index.html");
    }

    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(_) => {
            return write_response(write, 404, "Not Found", &[], b"not found", !head_only).await;
        }
    };

    let mime = content_type(&path);
    let body = if livereload && mime.starts_with("text/html") {
        with_client_script(body)
    } else {
        body
    };
    write_response(
        write,
        200,
        "OK",
        &[("Content-Type", mime), ("Cache-Control", "no-cache")],
        &body,
        !head_only,
    )
    .await
}

/// Insert the reload client before the last `</body>`, or append it.
fn with_client_script(body: Vec<u8>) -> Vec<u8> {
    let html = match String::from_utf8(body) {
        Ok(html) => html,
        Err(err) => return err.into_bytes(),
    };
    let at = html.to_ascii_lowercase().rfind("</body>").unwrap_or(html.len());
    let mut out = String::with_capacity(html.len() + CLIENT_SCRIPT.len());
    out.push_str(&html[..at]);
    out.push_str(CLIENT_SCRIPT);
    out.push_str(&html[at..]);
    out.into_bytes()
}

/// Hold the connection open, writing one `reload` event per broadcast.
async fn event_stream(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut write: OwnedWriteHalf,
    hub: &ReloadHub,
    shutdown: &CancelToken,
) -> std::io::Result<()> {
    let mut rx = hub.subscribe();
    write
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
              Cache-Control: no-cache\r\nConnection: keep-alive\r\n\r\nretry: 1000\n\n",
        )
        .await?;
    write.flush().await?;
    debug!(clients = hub.clients(), "live-reload client connected");

    let mut scratch = [0u8; 256];
    loop {
        let generation = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read(&mut scratch) => {
                // The client never sends a body; EOF means it went away.
                if read? == 0 {
                    debug!("live-reload client disconnected");
                    return Ok(());
                }
                continue;
            }
            received = rx.recv() => match received {
                Ok(generation) => generation,
                // Missed notifications collapse into a single reload.
                Err(RecvError::Lagged(_)) => 0,
                Err(RecvError::Closed) => return Ok(()),
            },
        };
        write
            .write_all(format!("event: reload\ndata: {generation}\n\n").as_bytes())
            .await?;
        write.flush().await?;
    }
}
