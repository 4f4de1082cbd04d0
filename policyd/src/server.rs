//! HTTP front end and the out-of-band registry refresh

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use warp::hyper::body::Bytes;
use warp::path::FullPath;
use warp::{Filter, Rejection, Reply};

use crate::codec;
use crate::config::{self, NamespaceSource};
use crate::dispatcher::Dispatcher;
use crate::error::{RegistrationError, Result};
use crate::hooks;
use crate::registry::{Registry, SharedRegistry};
use crate::webhook::Topology;

/// Upper bound on an admission review body
pub const MAX_BODY_BYTES: u64 = 3 * 1024 * 1024;

/// Certificate and key served when TLS is enabled
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Every route the service answers
pub fn routes(
    dispatcher: Dispatcher,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::get()
        .and(warp::path("healthz"))
        .and(warp::path::end())
        .map(|| "ok");

    let review = warp::post()
        .and(warp::path::full())
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .map(move |path: FullPath, content_type: Option<String>, body: Bytes| {
            let routed = dispatcher.route(path.as_str(), content_type.as_deref(), &body);
            warp::reply::with_status(
                warp::reply::with_header(routed.body, "content-type", codec::CONTENT_TYPE),
                routed.status,
            )
        });

    health.or(review)
}

/// Serves until `shutdown` resolves
pub async fn serve(
    dispatcher: Dispatcher,
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let routes = routes(dispatcher).with(warp::trace::request());

    match tls {
        Some(tls) => {
            // warp panics on unreadable key material, so check up front
            std::fs::metadata(&tls.cert)?;
            std::fs::metadata(&tls.key)?;

            let (bound, server) = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .bind_with_graceful_shutdown(addr, shutdown);
            info!(%bound, tls = true, "listening");
            server.await;
        }
        None => {
            let (bound, server) =
                warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
            info!(%bound, tls = false, "listening");
            server.await;
        }
    }

    info!("server stopped");
    Ok(())
}

/// Loads a config snapshot from `source` and builds the registry for it
pub async fn build_registry(
    source: &dyn NamespaceSource,
    topology: Option<Topology>,
) -> Result<Registry, RegistrationError> {
    let config = Arc::new(config::load(source).await?);
    hooks::registry(&config, topology)
}

/// Rebuilds the registry once and swaps it in
///
/// On failure the current snapshot keeps serving.
pub async fn refresh(
    source: &dyn NamespaceSource,
    registry: &SharedRegistry,
    topology: Option<Topology>,
) -> Result<(), RegistrationError> {
    let next = build_registry(source, topology).await?;
    info!(webhooks = next.len(), "registry refreshed");
    registry.store(next);
    Ok(())
}

/// Periodically refreshes `registry` from `source`
pub async fn refresh_loop(
    source: Arc<dyn NamespaceSource>,
    registry: SharedRegistry,
    topology: Option<Topology>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the caller already loaded once
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(err) = refresh(source.as_ref(), &registry, topology).await {
            error!(error = %err, "registry refresh failed, keeping previous snapshot");
        }
    }
}
