//! Fake transports shared by unit tests.

use crate::context::RequestContext;
use crate::error::HttpError;
use crate::response::response_body;
use crate::transport::{RequestBody, Transport, transport_fn};
use http::{Request, Response};
use http_body_util::BodyExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the echo transport saw.
#[derive(Debug, Deserialize)]
pub(crate) struct Echo {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
    pub has_context: bool,
}

impl Echo {
    pub fn header(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(name)
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Transport that answers every request with a JSON description of it.
pub(crate) fn echo_transport(calls: Arc<AtomicUsize>) -> Transport {
    transport_fn(move |req: Request<RequestBody>| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);

            let (parts, body) = req.into_parts();
            let body = body.collect().await?.to_bytes();

            let mut headers: HashMap<String, Vec<String>> = HashMap::new();
            for (name, value) in &parts.headers {
                headers
                    .entry(name.to_string())
                    .or_default()
                    .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }

            let echo = serde_json::json!({
                "method": parts.method.as_str(),
                "url": parts.uri.to_string(),
                "headers": headers,
                "body": String::from_utf8_lossy(&body),
                "has_context": parts.extensions.get::<RequestContext>().is_some(),
            });

            let response = Response::builder()
                .header("content-type", "application/json")
                .body(response_body(serde_json::to_vec(&echo)?))?;
            Ok::<_, HttpError>(response)
        }
    })
}

/// Server that promises a 10 byte body, sends 3 bytes and then stalls.
pub(crate) async fn stalled_body_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                socket.read(&mut buf).await.unwrap();
                socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            });
        }
    });

    addr
}
