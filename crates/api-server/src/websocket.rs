//! WebSocket handler for per-job event streams.
//!
//! Each connection subscribes to one job and receives `JobEvent` JSON
//! frames until the job's `job_complete` event (after which the server
//! closes) or the client disconnects. Connecting to an already-terminal
//! job yields a single synthetic `job_complete` frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sweep_core::{Job, JobEvent};

use crate::error::ApiError;
use crate::state::AppState;

/// WebSocket upgrade handler for a job's event stream. Rejects unknown
/// jobs before upgrading.
pub async fn ws_job_events_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.manager.job(job_id) {
        Ok(job) => ws.on_upgrade(move |socket| handle_job_events_socket(socket, state, job)),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn handle_job_events_socket(socket: WebSocket, state: Arc<AppState>, job: Job) {
    let job_id = job.id;
    let (mut sender, mut receiver) = socket.split();

    info!(job_id = %job_id, "WebSocket client subscribed to job events");

    if job.status.is_terminal() {
        send_terminal_snapshot(&mut sender, &job).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let stream = state.bus.subscribe(job_id).await;
    let mut events = stream.events;
    // The log receiver is dropped once its channel closes so the select
    // loop does not spin on a closed branch.
    let mut logs = Some(stream.logs);

    // The job may have finalized between the snapshot and the
    // subscription; its job_complete was published before we joined.
    match state.manager.job(job_id) {
        Ok(current) if current.status.is_terminal() => {
            send_terminal_snapshot(&mut sender, &current).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Ok(_) => {}
        Err(_) => {
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(job_id = %job_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(message)) => {
                        if let Some(reply) = control_reply(&message) {
                            if sender.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(job_id = %job_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        if !send_event(&mut sender, &event).await || terminal {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    // Bus released the job's channel state.
                    None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            log = recv_log(&mut logs) => {
                match log {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(job_id = %job_id, skipped, "Client lagged, dropped oldest log events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        logs = None;
                    }
                }
            }
        }
    }

    info!(job_id = %job_id, "WebSocket client unsubscribed from job events");
}

async fn recv_log(
    logs: &mut Option<broadcast::Receiver<JobEvent>>,
) -> Result<JobEvent, broadcast::error::RecvError> {
    match logs {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Serialize one event into a text frame.
fn event_frame(event: &JobEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(error = %e, "Failed to serialize job event");
            None
        }
    }
}

/// The single `job_complete` frame sent to subscribers of a job that is
/// already terminal.
fn terminal_frame(job: &Job) -> Option<Message> {
    event_frame(&JobEvent::job_complete(job.id, job.status, job.counters))
}

/// Reply owed for a client frame, if any. Client pings are answered with
/// a matching pong; everything else on this one-way stream is ignored.
fn control_reply(message: &Message) -> Option<Message> {
    match message {
        Message::Ping(payload) => Some(Message::Pong(payload.clone())),
        _ => None,
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &JobEvent,
) -> bool {
    match event_frame(event) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => true,
    }
}

async fn send_terminal_snapshot(sender: &mut (impl SinkExt<Message> + Unpin), job: &Job) {
    if let Some(frame) = terminal_frame(job) {
        let _ = sender.send(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use sweep_core::{JobCounters, JobStatus};

    #[test]
    fn test_terminal_frame_is_job_complete() {
        let mut job = Job::new("momentum_v1", vec!["AAPL".to_string(), "MSFT".to_string()]);
        job.status = JobStatus::Cancelled;
        job.counters = JobCounters {
            total: 2,
            completed: 1,
            successful: 1,
            failed: 0,
        };

        let frame = terminal_frame(&job).unwrap();
        match frame {
            Message::Text(json) => {
                assert!(json.contains("\"type\":\"job_complete\""));
                assert!(json.contains("\"status\":\"cancelled\""));
                assert!(json.contains("\"total\":2"));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_event_frame_carries_type_discriminator() {
        let job_id = uuid::Uuid::new_v4();
        let counters = JobCounters {
            total: 4,
            completed: 1,
            successful: 1,
            failed: 0,
        };
        let frame = event_frame(&JobEvent::progress(job_id, counters)).unwrap();
        match frame {
            Message::Text(json) => {
                assert!(json.contains("\"type\":\"progress\""));
                assert!(json.contains("\"progress\":25"));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_client_ping_gets_matching_pong() {
        let reply = control_reply(&Message::Ping(Bytes::from_static(b"keepalive")));
        match reply {
            Some(Message::Pong(payload)) => assert_eq!(payload.as_ref(), b"keepalive"),
            other => panic!("expected pong, got {other:?}"),
        }

        // Text frames on this one-way stream owe no reply.
        assert!(control_reply(&Message::Text("hello".into())).is_none());
    }
}
