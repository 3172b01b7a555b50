//! HTTP + SSE client for the workflow execution engine.
//!
//! Requests are POSTed as JSON and answered with a `text/event-stream`
//! body: one JSON chunk per `data:` line, terminated by `[DONE]`. The
//! app secret is wrapped in [`secrecy::SecretString`] and only exposed
//! while building the `Authorization` header.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, retry};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use flowcast_core::upstream::{ChunkStream, UpstreamGateway};
use flowcast_types::config::UpstreamConfig;
use flowcast_types::error::UpstreamError;
use flowcast_types::event::{DONE_SENTINEL, WorkflowChunk};
use flowcast_types::workflow::{ComparisonRun, UpstreamPayload, UpstreamTarget};

/// Upstream gateway speaking HTTP with server-sent events.
pub struct HttpUpstreamGateway {
    client: reqwest::Client,
    app_key: String,
    app_secret: SecretString,
    comparison_url: String,
    connect_timeout: Duration,
}

impl HttpUpstreamGateway {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| UpstreamError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            app_key: config.app_key.clone(),
            app_secret: SecretString::from(config.app_secret.clone()),
            comparison_url: config.comparison_url.clone(),
            connect_timeout: config.connect_timeout(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.app_key.is_empty() {
            return request;
        }
        request.bearer_auth(format!("{}:{}", self.app_key, self.app_secret.expose_secret()))
    }
}

/// Decode one SSE data line. `None` for keep-alive blanks.
fn decode(data: &str) -> Result<Option<WorkflowChunk>, UpstreamError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(data)
        .map(Some)
        .map_err(|e| UpstreamError::Decode(format!("{e}: {data}")))
}

async fn map_error(err: reqwest_eventsource::Error, connect_timeout: Duration) -> UpstreamError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => UpstreamError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => UpstreamError::Decode(format!(
            "unexpected content type {}",
            content_type.to_str().unwrap_or("<binary>")
        )),
        reqwest_eventsource::Error::Transport(e) if e.is_timeout() => UpstreamError::Timeout(connect_timeout),
        reqwest_eventsource::Error::Transport(e) => UpstreamError::Unavailable(e.to_string()),
        other => UpstreamError::Unavailable(other.to_string()),
    }
}

impl UpstreamGateway for HttpUpstreamGateway {
    async fn open(
        &self,
        target: &UpstreamTarget,
        payload: &UpstreamPayload,
    ) -> Result<ChunkStream, UpstreamError> {
        let request = self.authorize(self.client.post(&target.url)).json(payload);
        let mut source = EventSource::new(request)
            .map_err(|e| UpstreamError::Unavailable(format!("cannot build request: {e}")))?;
        source.set_retry_policy(Box::new(retry::Never));

        debug!(endpoint = %target.kind, url = %target.url, "Opening upstream stream");

        // The source yields `Open` once the response headers are accepted.
        let mut first = None;
        match tokio::time::timeout(self.connect_timeout, source.next()).await {
            Err(_) => {
                source.close();
                return Err(UpstreamError::Timeout(self.connect_timeout));
            }
            Ok(None) => {
                return Err(UpstreamError::Unavailable(
                    "connection closed before the stream opened".to_string(),
                ));
            }
            Ok(Some(Ok(Event::Open))) => {}
            Ok(Some(Ok(Event::Message(message)))) => first = Some(message.data),
            Ok(Some(Err(e))) => {
                source.close();
                return Err(map_error(e, self.connect_timeout).await);
            }
        }

        let connect_timeout = self.connect_timeout;
        let stream = async_stream::try_stream! {
            if let Some(data) = first {
                if let Some(chunk) = decode(&data)? {
                    yield chunk;
                }
            }
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == DONE_SENTINEL {
                            break;
                        }
                        if let Some(chunk) = decode(&message.data)? {
                            yield chunk;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        source.close();
                        Err::<(), _>(map_error(e, connect_timeout).await)?;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }

    async fn delete_comparisons(&self, run: &ComparisonRun) -> Result<(), UpstreamError> {
        let response = self
            .authorize(self.client.delete(&self.comparison_url))
            .query(&[("flowId", run.flow_id.as_str()), ("version", run.version.as_str())])
            .timeout(self.connect_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.connect_timeout)
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), flow_id = %run.flow_id, "Comparison cleanup rejected");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use flowcast_types::workflow::{ResumePayload, TargetKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// One-shot HTTP server answering every connection with `response`.
    /// Returns its base URL and the raw requests it received.
    async fn serve(response: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn config(base: &str) -> UpstreamConfig {
        UpstreamConfig {
            chat_url: format!("{base}/chat"),
            debug_url: format!("{base}/debug"),
            resume_url: format!("{base}/resume"),
            comparison_url: format!("{base}/comparisons"),
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
            connect_timeout_secs: 1,
            idle_timeout_secs: 5,
        }
    }

    fn target(base: &str) -> UpstreamTarget {
        UpstreamTarget {
            kind: TargetKind::Resume,
            url: format!("{base}/resume"),
        }
    }

    fn payload() -> UpstreamPayload {
        UpstreamPayload::Resume(ResumePayload {
            event_id: "evt-1".to_string(),
            event_type: "resume".to_string(),
            content: "yes".to_string(),
        })
    }

    const SSE_OK: &str = concat!(
        "HTTP/1.1 200 OK\r\n",
        "Content-Type: text/event-stream\r\n",
        "Connection: close\r\n\r\n",
        "data: {\"code\":0,\"message\":\"ok\",\"id\":\"sid-1\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"index\":0}],\"workflow_step\":{\"node\":{\"id\":\"message-1\"}}}\n\n",
        "data: {\"code\":0,\"message\":\"ok\",\"id\":\"sid-1\",\"choices\":[{\"delta\":{\"content\":\"!\"},\"index\":0}],\"workflow_step\":{\"node\":{\"id\":\"message-1\",\"finish_reason\":\"stop\"}}}\n\n",
        "data: [DONE]\n\n",
        "data: {\"code\":0,\"message\":\"after done\"}\n\n",
    );

    #[tokio::test]
    async fn test_open_streams_chunks_until_done() {
        let (base, seen) = serve(SSE_OK).await;
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        let mut stream = gateway.open(&target(&base), &payload()).await.unwrap();
        let mut contents = Vec::new();
        while let Some(chunk) = stream.next().await {
            contents.push(chunk.unwrap().content().to_string());
        }
        assert_eq!(contents, vec!["Hi", "!"]);

        let request = seen.lock().unwrap()[0].clone();
        assert!(request.starts_with("POST /resume"));
        assert!(request.contains("\"event_id\":\"evt-1\""));
        assert!(request.to_lowercase().contains("authorization: bearer key:secret"));
    }

    #[tokio::test]
    async fn test_error_status_is_rejected_with_body() {
        let (base, _) = serve(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
        )
        .await;
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        let err = gateway.open(&target(&base), &payload()).await.err().unwrap();
        match err {
            UpstreamError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        let err = gateway.open(&target(&base), &payload()).await.err().unwrap();
        assert!(matches!(err, UpstreamError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        let err = gateway.open(&target(&base), &payload()).await.err().unwrap();
        assert!(matches!(err, UpstreamError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_decode_error() {
        let (base, _) = serve(concat!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            "data: {not json\n\n",
        ))
        .await;
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        let mut stream = gateway.open(&target(&base), &payload()).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(UpstreamError::Decode(_))));
    }

    #[tokio::test]
    async fn test_delete_comparisons_sends_query() {
        let (base, seen) = serve("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let gateway = HttpUpstreamGateway::new(&config(&base)).unwrap();

        gateway
            .delete_comparisons(&ComparisonRun {
                flow_id: "f-1".to_string(),
                version: "v2".to_string(),
            })
            .await
            .unwrap();

        let request = seen.lock().unwrap()[0].clone();
        assert!(request.starts_with("DELETE /comparisons?flowId=f-1&version=v2"));
    }
}
