//! Per-interface HTTP server serving the hosted-file catalog.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use memmap2::Mmap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::HostError;
use crate::file::{FileTable, MapRelease, MappedBody, SharedTable};

pub(crate) struct HostServer {
    pub table: SharedTable,
    pub port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl HostServer {
    /// Bind an ephemeral-port listener on `iface_ip` and start serving.
    pub async fn bind(iface_ip: &str) -> Result<Self, HostError> {
        let addr = format!("{}:0", iface_ip);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HostError::HostFailed(iface_ip.to_string(), e.to_string()))?;

        let port = listener
            .local_addr()
            .map_err(|e| HostError::HostFailed(iface_ip.to_string(), e.to_string()))?
            .port();

        let table: SharedTable = Arc::new(Mutex::new(FileTable::default()));
        let app = Router::new()
            .fallback(serve_file)
            .with_state(Arc::clone(&table));

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                warn!("host server terminated: {}", e);
            }
        });

        info!("✅ host server ready on {}:{}", iface_ip, port);

        Ok(Self {
            table,
            port,
            shutdown,
            handle,
        })
    }

    /// Stop accepting connections; in-flight responses are drained.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

/// Single handler for everything that reaches the listener.
///
/// Lookup is by exact match of the request path against the registered URL
/// paths. The mapping of the source file is shared across simultaneous
/// responses; the body carries the release hook that drops the reference once
/// the response has been written.
async fn serve_file(State(table): State<SharedTable>, request: Request) -> Response {
    if request.method() != Method::GET {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }

    let url_path = request.uri().path().to_string();

    let mut guard = table.lock();

    let Some(source) = guard.source_for_url(&url_path) else {
        debug!("no hosted file at {}", url_path);
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = guard
        .files
        .get_mut(&source)
        .expect("source_for_url returned a live key");

    let map = match &file.mapping {
        Some(map) => {
            file.mapped_count += 1;
            Arc::clone(map)
        }
        None => match map_source(&source) {
            Ok(map) => {
                let map = Arc::new(map);
                file.mapping = Some(Arc::clone(&map));
                file.mapped_count = 1;
                map
            }
            Err(e) => {
                warn!("failed to map {}: {}", source, e);
                return StatusCode::NOT_FOUND.into_response();
            }
        },
    };

    let mime_type = file.mime_type.clone();
    drop(guard);

    let body = MappedBody {
        map,
        _release: MapRelease {
            table: Arc::clone(&table),
            source,
        },
    };

    // TODO: add the DLNA contentFeatures headers real renderers expect.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .body(Body::from(Bytes::from_owner(body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn map_source(source: &str) -> std::io::Result<Mmap> {
    let file = std::fs::File::open(source)?;
    // Read-only mapping; the slot in FileTable keeps it alive while responses
    // reference it.
    unsafe { Mmap::map(&file) }
}
