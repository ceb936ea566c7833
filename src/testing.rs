//! Local HTTP server for tests that need real responses.

use axum::Router;
use tokio::net::TcpListener;
use url::Url;

/// Serves `app` on a free local port and returns its base URL.
pub(crate) async fn serve(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/").parse().unwrap()
}
