//! Per-job progress streaming.
//!
//! [`ComfyUiClient::monitor_progress`] opens a dedicated WebSocket
//! scoped to one job's client identity and turns the raw message flow
//! into a finite sequence of [`ProgressEvent`]s. The stream is lazy
//! (events are produced into a bounded channel and pulled by the
//! consumer) and cancellable: dropping the [`ProgressStream`] cancels
//! the producer task and releases the socket.
//!
//! State machine:
//!   1. Short settle delay, then a one-shot history check. A job that
//!      already completed (cached execution) yields a single
//!      `Executed` event with no stream traffic at all.
//!   2. Connect the socket. The job timeout is measured from here.
//!   3. Listening loop: each read waits at most the per-message
//!      timeout so the loop stays responsive to the overall deadline;
//!      an empty poll is not a failure. Messages are filtered to the
//!      subject prompt ID — anything else on the wire is ignored.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUiClient;
use crate::error::ComfyUiError;
use crate::messages::{parse_message, ComfyUiMessage, ImageRef};

/// Buffered events between producer and consumer.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Timeouts governing one monitoring session.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Hard ceiling on the whole job, measured from stream connect.
    pub job_timeout: Duration,
    /// Per-message receive timeout; expiry is an empty poll, not an
    /// error.
    pub message_timeout: Duration,
    /// Settle delay before the one-shot history check, giving the
    /// engine time to register the prompt.
    pub history_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(300),
            message_timeout: Duration::from_secs(5),
            history_delay: Duration::from_millis(500),
        }
    }
}

/// A progress event for one monitored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A node is currently executing.
    Executing { node: String },
    /// The job finished and produced these images (possibly none).
    Executed { images: Vec<ImageRef> },
    /// The engine reported a failure or interruption.
    Error { message: String },
}

/// Lazy, finite, non-restartable sequence of [`ProgressEvent`]s.
///
/// Ends after a terminal event (`Executed`, or `Error` followed by the
/// terminal `Err`). Dropping the stream cancels the producer promptly.
pub struct ProgressStream {
    rx: mpsc::Receiver<Result<ProgressEvent, ComfyUiError>>,
    cancel: CancellationToken,
}

impl ProgressStream {
    /// Wrap an already-running producer. The token is cancelled when
    /// the stream is dropped.
    pub fn from_channel(
        rx: mpsc::Receiver<Result<ProgressEvent, ComfyUiError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { rx, cancel }
    }

    /// Pull the next event. `None` means the sequence has ended.
    pub async fn next(&mut self) -> Option<Result<ProgressEvent, ComfyUiError>> {
        self.rx.recv().await
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// What the listening loop should do with one parsed message.
#[derive(Debug)]
enum StreamAction {
    /// Not ours, or informational only.
    Ignore,
    /// Emit and keep listening.
    Emit(ProgressEvent),
    /// Emit and end the sequence successfully.
    Finish(ProgressEvent),
    /// Emit, then end the sequence with a terminal error.
    Fail(ProgressEvent, ComfyUiError),
}

/// Decide how a message affects the monitored job.
///
/// Messages whose payload names a different prompt ID are ignored:
/// the socket is scoped to one client identity, but filtering is a
/// structural invariant, not an optimization.
fn dispatch(msg: &ComfyUiMessage, prompt_id: &str) -> StreamAction {
    match msg {
        ComfyUiMessage::Executing(data) if data.prompt_id == prompt_id => match &data.node {
            Some(node) => StreamAction::Emit(ProgressEvent::Executing { node: node.clone() }),
            // node == None signals "all nodes done"; the executed
            // message carries the outputs, so nothing to emit here.
            None => StreamAction::Ignore,
        },
        ComfyUiMessage::Executed(data) if data.prompt_id == prompt_id => {
            StreamAction::Finish(ProgressEvent::Executed {
                images: data.images(),
            })
        }
        ComfyUiMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            let node_id = if data.node_id.is_empty() {
                "unknown"
            } else {
                data.node_id.as_str()
            };
            let message = format!("Error at node {node_id}: {}", data.exception_message);
            StreamAction::Fail(
                ProgressEvent::Error {
                    message: message.clone(),
                },
                ComfyUiError::Execution(message),
            )
        }
        ComfyUiMessage::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
            let message = "Workflow execution was interrupted".to_string();
            StreamAction::Fail(
                ProgressEvent::Error {
                    message: message.clone(),
                },
                ComfyUiError::Execution(message),
            )
        }
        _ => StreamAction::Ignore,
    }
}

impl ComfyUiClient {
    /// Monitor one job's execution.
    ///
    /// `client_id` must be the identity used at submission so the
    /// socket only carries this job's events; `None` falls back to a
    /// fresh identity (degraded: node-level events addressed to the
    /// submitting identity will not be seen, but history-based
    /// completion still works).
    pub fn monitor_progress(
        &self,
        prompt_id: &str,
        client_id: Option<&str>,
        config: MonitorConfig,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let client = self.clone();
        let prompt_id = prompt_id.to_string();
        let client_id = client_id
            .map(str::to_string)
            .unwrap_or_else(ComfyUiClient::fresh_client_id);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!(prompt_id = %prompt_id, "Monitor cancelled by consumer");
                }
                _ = run_monitor(client, &prompt_id, &client_id, config, tx) => {}
            }
        });

        ProgressStream { rx, cancel }
    }
}

/// Producer side of the stream. Sends events until a terminal state,
/// then returns; a closed channel (consumer gone) also ends the task.
async fn run_monitor(
    client: ComfyUiClient,
    prompt_id: &str,
    client_id: &str,
    config: MonitorConfig,
    tx: mpsc::Sender<Result<ProgressEvent, ComfyUiError>>,
) {
    // Terminal-state shortcut for cached/already-finished jobs.
    tokio::time::sleep(config.history_delay).await;
    if let Ok(Some(entry)) = client.get_history(prompt_id).await {
        if entry.status.completed {
            let images = entry.images();
            if !images.is_empty() {
                tracing::info!(prompt_id, "Job already completed (cached result)");
                let _ = tx.send(Ok(ProgressEvent::Executed { images })).await;
                return;
            }
            tracing::warn!(prompt_id, "History reports completion but no images; streaming");
        }
    }

    let url = format!("{}/ws?clientId={client_id}", client.ws_url());
    tracing::info!(prompt_id, url = %url, "Connecting progress stream");

    let (mut ws, _response) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            let _ = tx
                .send(Err(ComfyUiError::Connectivity(format!(
                    "WebSocket connection failed: {e}"
                ))))
                .await;
            return;
        }
    };

    // The job ceiling starts at connect time, not submission time.
    let deadline = Instant::now() + config.job_timeout;

    loop {
        if Instant::now() >= deadline {
            let _ = tx
                .send(Err(ComfyUiError::ExecutionTimeout(
                    config.job_timeout.as_secs(),
                )))
                .await;
            return;
        }

        let frame = match tokio::time::timeout(config.message_timeout, ws.next()).await {
            // Empty poll; loop back to the deadline check.
            Err(_) => continue,
            Ok(None) => {
                let _ = tx
                    .send(Err(ComfyUiError::Connectivity(
                        "WebSocket closed by server".to_string(),
                    )))
                    .await;
                return;
            }
            Ok(Some(Err(e))) => {
                let _ = tx
                    .send(Err(ComfyUiError::Connectivity(format!(
                        "WebSocket receive error: {e}"
                    ))))
                    .await;
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text,
            // Binary frames are node preview images; not part of the
            // progress contract.
            Message::Binary(_) => continue,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(frame) => {
                tracing::info!(prompt_id, ?frame, "Progress stream closed");
                let _ = tx
                    .send(Err(ComfyUiError::Connectivity(
                        "WebSocket closed by server".to_string(),
                    )))
                    .await;
                return;
            }
        };

        let msg = match parse_message(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(prompt_id, error = %e, "Ignoring unrecognized message");
                continue;
            }
        };

        match dispatch(&msg, prompt_id) {
            StreamAction::Ignore => {}
            StreamAction::Emit(event) => {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            StreamAction::Finish(event) => {
                tracing::info!(prompt_id, "Job execution completed");
                let _ = tx.send(Ok(event)).await;
                return;
            }
            StreamAction::Fail(event, error) => {
                tracing::error!(prompt_id, error = %error, "Job execution failed");
                if tx.send(Ok(event)).await.is_ok() {
                    let _ = tx.send(Err(error)).await;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn msg(text: &str) -> ComfyUiMessage {
        parse_message(text).unwrap()
    }

    #[test]
    fn executing_message_for_subject_job_is_emitted() {
        let m = msg(r#"{"type":"executing","data":{"prompt_id":"p1","node":"3"}}"#);
        assert_matches!(
            dispatch(&m, "p1"),
            StreamAction::Emit(ProgressEvent::Executing { node }) if node == "3"
        );
    }

    #[test]
    fn executing_message_for_other_job_is_ignored() {
        let m = msg(r#"{"type":"executing","data":{"prompt_id":"p2","node":"3"}}"#);
        assert_matches!(dispatch(&m, "p1"), StreamAction::Ignore);
    }

    #[test]
    fn executing_completion_marker_is_ignored() {
        let m = msg(r#"{"type":"executing","data":{"prompt_id":"p1","node":null}}"#);
        assert_matches!(dispatch(&m, "p1"), StreamAction::Ignore);
    }

    #[test]
    fn executed_message_finishes_with_images() {
        let m = msg(
            r#"{"type":"executed","data":{"prompt_id":"p1","output":{"images":[{"filename":"a.png","subfolder":"","type":"output"}]}}}"#,
        );
        let action = dispatch(&m, "p1");
        assert_matches!(
            action,
            StreamAction::Finish(ProgressEvent::Executed { images }) if images.len() == 1 && images[0].filename == "a.png"
        );
    }

    #[test]
    fn full_executing_then_executed_sequence() {
        // The §4.3 happy path: executing then executed, stream ends.
        let frames = [
            r#"{"type":"executing","data":{"prompt_id":"p1","node":"3"}}"#,
            r#"{"type":"executed","data":{"prompt_id":"p1","output":{"images":[{"filename":"a.png","subfolder":"","type":"output"}]}}}"#,
        ];
        let first = dispatch(&msg(frames[0]), "p1");
        let second = dispatch(&msg(frames[1]), "p1");
        assert_matches!(first, StreamAction::Emit(ProgressEvent::Executing { .. }));
        assert_matches!(second, StreamAction::Finish(ProgressEvent::Executed { .. }));
    }

    #[test]
    fn execution_error_emits_once_then_fails() {
        let m = msg(
            r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#,
        );
        let action = dispatch(&m, "p1");
        match action {
            StreamAction::Fail(ProgressEvent::Error { message }, err) => {
                assert_eq!(message, "Error at node 5: out of memory");
                assert_matches!(err, ComfyUiError::Execution(_));
            }
            other => panic!("Expected Fail, got {other:?}"),
        }
    }

    #[test]
    fn execution_error_for_other_job_is_ignored() {
        let m = msg(
            r#"{"type":"execution_error","data":{"prompt_id":"p9","node_id":"5","exception_message":"boom","exception_type":"E"}}"#,
        );
        assert_matches!(dispatch(&m, "p1"), StreamAction::Ignore);
    }

    #[test]
    fn interruption_maps_to_error_then_failure() {
        let m = msg(r#"{"type":"execution_interrupted","data":{"prompt_id":"p1"}}"#);
        match dispatch(&m, "p1") {
            StreamAction::Fail(ProgressEvent::Error { message }, _) => {
                assert_eq!(message, "Workflow execution was interrupted");
            }
            other => panic!("Expected Fail, got {other:?}"),
        }
    }

    #[test]
    fn status_and_progress_messages_are_ignored() {
        let status =
            msg(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":1}}}}"#);
        let progress = msg(r#"{"type":"progress","data":{"value":5,"max":20}}"#);
        assert_matches!(dispatch(&status, "p1"), StreamAction::Ignore);
        assert_matches!(dispatch(&progress, "p1"), StreamAction::Ignore);
    }

    #[test]
    fn error_without_node_id_reports_unknown() {
        let m = msg(
            r#"{"type":"execution_error","data":{"prompt_id":"p1","exception_message":"boom"}}"#,
        );
        match dispatch(&m, "p1") {
            StreamAction::Fail(ProgressEvent::Error { message }, _) => {
                assert_eq!(message, "Error at node unknown: boom");
            }
            other => panic!("Expected Fail, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_stream_cancels_producer() {
        let client = ComfyUiClient::new("http://localhost:1");
        let stream = client.monitor_progress("p1", Some("cid"), MonitorConfig::default());
        let cancel = stream.cancel.clone();
        drop(stream);
        assert!(cancel.is_cancelled());
    }

    /// Serve one HTTP request with the given JSON body, then stop
    /// listening (later connections are refused). Returns the base URL.
    async fn history_stub(body: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = body.to_string();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            job_timeout: Duration::from_secs(5),
            message_timeout: Duration::from_secs(1),
            history_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn completed_history_yields_single_executed_without_streaming() {
        // The stub serves exactly one request (the history lookup) and
        // then refuses connections, so any attempt to open the
        // progress socket would surface as a Connectivity error event.
        let base = history_stub(
            r#"{"p1":{"status":{"completed":true},"outputs":{"9":{"images":[{"filename":"a.png","subfolder":"","type":"output"}]}}}}"#,
        )
        .await;
        let client = ComfyUiClient::new(base);

        let mut stream = client.monitor_progress("p1", Some("cid"), fast_config());
        let first = stream.next().await.unwrap().unwrap();
        assert_matches!(
            first,
            ProgressEvent::Executed { images } if images.len() == 1 && images[0].filename == "a.png"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn completed_history_without_images_falls_through_to_streaming() {
        // Completion with no images must not synthesize an empty
        // Executed; the monitor goes on to open the socket, which the
        // stub refuses.
        let base = history_stub(r#"{"p1":{"status":{"completed":true},"outputs":{}}}"#).await;
        let client = ComfyUiClient::new(base);

        let mut stream = client.monitor_progress("p1", Some("cid"), fast_config());
        let first = stream.next().await.unwrap();
        assert_matches!(first, Err(ComfyUiError::Connectivity(_)));
        assert!(stream.next().await.is_none());
    }
}
