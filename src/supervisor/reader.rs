//! Output reader task.
//!
//! Drives a [`FramedRead`] over one child output stream and forwards each
//! decoded line to the control loop as [`ControlEvent::Line`]. A process
//! with both stdout and stderr captured gets one reader per stream feeding
//! the same channel, which yields the combined output.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::ControlEvent;
use crate::models::process::ProcessTag;
use crate::supervisor::codec::TelemetryCodec;

/// Read lines from `stream` until EOF, an I/O error, or cancellation.
pub async fn run_reader<R>(
    tag: ProcessTag,
    stream: R,
    events: mpsc::Sender<ControlEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, TelemetryCodec::new());
    let session_id = tag.session.0;
    let role = tag.role.label();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, role, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, role, "reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(session_id, role, %err, "reader: IO error, stopping");
                        break;
                    }
                    Some(Ok(text)) => {
                        if events.send(ControlEvent::Line { tag, text }).await.is_err() {
                            debug!(session_id, role, "reader: event channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}
