use std::{net::SocketAddr, thread};

use anyhow::Context;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;

/// Serve `dist` over HTTP on a dedicated thread. HTML responses get the
/// reload client for `reload_port` injected.
pub fn start(dist: Utf8PathBuf, port: u16, reload_port: u16) -> thread::JoinHandle<anyhow::Result<()>> {
    tracing::info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(dist, port, reload_port)));

        if let Err(e) = &result {
            tracing::error!("HTTP server on port {port} stopped: {e:#}");
        }

        result
    })
}

async fn serve(dist: Utf8PathBuf, port: u16, reload_port: u16) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("couldn't bind port {port}"))?;

    axum::serve(address, router(dist, reload_port)).await?;

    Ok(())
}

/// Static files from `dist`, with the reload client injected into HTML.
fn router(dist: Utf8PathBuf, reload_port: u16) -> Router {
    Router::new()
        // path to the dist directory with generated assets
        .fallback_service(ServeDir::new(dist))
        .layer(middleware::from_fn_with_state(reload_port, inject))
}

async fn inject(State(port): State<u16>, request: Request, next: Next) -> Response {
    let is_head = request.method() == Method::HEAD;
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if is_head || !is_html || !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't buffer response: {e}");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), port);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Get the JS script which enables live reloading.
pub fn refresh_script(port: u16) -> String {
    format!(
        r#"<script>
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
</script>"#
    )
}

/// Insert the reload client before the last `</body>`, or at the end when
/// the document has none.
pub fn inject_script(html: &str, port: u16) -> String {
    let script = refresh_script(port);

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], script, &html[at..]),
        None => format!("{html}{script}"),
    }
}
