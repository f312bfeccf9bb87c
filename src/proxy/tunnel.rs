//! HTTP CONNECT tunneling.
//!
//! The upstream socket is opened before answering, so a client only sees
//! `200` once there is something to relay to. After the upgrade the proxy
//! is a transparent byte pipe; bytes the client pipelined behind the
//! request head are part of the upgraded stream and are relayed too.

use axum::body::Body;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::sync::Arc;

use crate::load_balancer::UpstreamTarget;
use crate::observability::metrics;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::response::error_response;
use crate::proxy::server::ProxyInner;

pub(crate) async fn connect(inner: Arc<ProxyInner>, req: Request<Incoming>) -> Response<Body> {
    let target = match connect_target(req.uri()) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected CONNECT request");
            metrics::record_tunnel("rejected");
            return error_response(e.status(), &e.to_string(), true);
        }
    };

    let timeout = inner.options.connect_timeout;
    let upstream = match tokio::time::timeout(timeout, inner.dialer.connect_tcp(&target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            let e = ProxyError::UpstreamConnect {
                addr: target.authority(),
                source,
            };
            tracing::warn!(error = %e, "Tunnel upstream unreachable");
            metrics::record_tunnel("connect_failed");
            return error_response(e.status(), &e.to_string(), true);
        }
        Err(_) => {
            let e = ProxyError::UpstreamTimeout(timeout);
            tracing::warn!(upstream = %target, error = %e, "Tunnel upstream timed out");
            metrics::record_tunnel("connect_timeout");
            return error_response(e.status(), &e.to_string(), true);
        }
    };

    tracing::debug!(upstream = %target, "Tunnel established");
    let guard = inner.tracker.track();
    let mut shutdown = inner.shutdown.subscribe();

    tokio::spawn(async move {
        let _guard = guard;
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::warn!(upstream = %target, error = %e, "CONNECT upgrade failed");
                metrics::record_tunnel("upgrade_failed");
                return;
            }
        };
        let mut client = TokioIo::new(upgraded);
        let mut upstream = upstream;

        tokio::select! {
            result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
                Ok((to_upstream, to_client)) => {
                    tracing::debug!(upstream = %target, to_upstream, to_client, "Tunnel closed");
                    metrics::record_bytes("tunnel_upstream", to_upstream);
                    metrics::record_bytes("tunnel_client", to_client);
                    metrics::record_tunnel("completed");
                }
                Err(e) => {
                    tracing::debug!(upstream = %target, error = %e, "Tunnel ended with error");
                    metrics::record_tunnel("error");
                }
            },
            _ = shutdown.recv() => {
                tracing::debug!(upstream = %target, "Tunnel closed by shutdown");
                metrics::record_tunnel("shutdown");
            }
        }
    });

    Response::new(Body::empty())
}

/// CONNECT targets are authority-form (`host:port`); the port defaults to 443.
fn connect_target(uri: &Uri) -> ProxyResult<UpstreamTarget> {
    let authority = uri
        .authority()
        .ok_or_else(|| ProxyError::InvalidRequest(format!("CONNECT target '{uri}' has no authority")))?;
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::InvalidRequest("CONNECT target has an empty host".into()));
    }
    Ok(UpstreamTarget::new(host, authority.port_u16().unwrap_or(443)))
}
