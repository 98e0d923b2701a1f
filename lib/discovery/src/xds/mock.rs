//! An in-process xDS control plane for tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use super::message::{DiscoveryRequest, DiscoveryResponse};

/// Serves `handler` on a random local port. A `None` response is sent as
/// an empty body.
pub async fn start<F>(handler: F) -> SocketAddr
where
    F: Fn(&Parts, DiscoveryRequest) -> (StatusCode, Option<DiscoveryResponse>)
        + Send
        + Sync
        + 'static,
{
    start_raw(move |parts, req| {
        let (status, resp) = handler(parts, req);
        let body = resp
            .map(|resp| serde_json::to_vec(&resp).unwrap())
            .unwrap_or_default();

        (status, body)
    })
    .await
}

pub async fn start_raw<F>(handler: F) -> SocketAddr
where
    F: Fn(&Parts, DiscoveryRequest) -> (StatusCode, Vec<u8>) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((conn, _peer)) = listener.accept().await else {
                break;
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = Arc::clone(&handler);

                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        let request = serde_json::from_slice::<DiscoveryRequest>(&body).unwrap();

                        let (status, body) = handler(&parts, request);
                        let mut resp = Response::new(Full::<Bytes>::from(body));
                        *resp.status_mut() = status;

                        Ok::<_, Infallible>(resp)
                    }
                });

                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(conn), service)
                    .await;
            });
        }
    });

    addr
}
