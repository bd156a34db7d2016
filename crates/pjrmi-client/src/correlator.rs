//! Request/response correlation (spec.md §4.5).
//!
//! PJRmi multiplexes many outstanding calls over one transport; replies
//! can arrive out of order and are matched back to callers by
//! `request_id`. Two modes:
//!
//! - **Non-reentrant** (default): the calling thread itself reads frames
//!   off the transport until it sees its own `request_id`, stashing any
//!   others it reads along the way for their owners to pick up later.
//! - **Reentrant**: a single dedicated receiver thread owns all reads and
//!   wakes callers via a condition variable; this is required once the
//!   peer may send unsolicited (server-originated) requests that must be
//!   dispatched to a worker pool without blocking the receiver.
//!
//! Mirrors the teacher's split between a pure data structure and the
//! thread that drives it: this module holds the shared `Mutex`-protected
//! table and `Condvar`, but spawning the receiver thread itself is
//! `Connection`'s job in `lifecycle.rs`.

use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use pjrmi_proto::{Frame, MessageType};

use crate::{error::ClientError, transport::Transport};

/// Whether the correlator drives its own dedicated receiver thread
/// (reentrant, required for server-originated callbacks) or piggybacks
/// reads onto whichever caller thread is waiting (non-reentrant, spec.md
/// §4.5's default mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Caller threads read frames for themselves.
    NonReentrant,
    /// A dedicated receiver thread reads every frame and wakes waiters.
    Reentrant,
}

struct Shared {
    received: Mutex<HashMap<i32, Frame>>,
    condvar: Condvar,
    closed: Mutex<Option<String>>,
}

/// Matches outgoing requests to their eventual replies by `request_id`.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    mode: CorrelationMode,
    /// Unsolicited server-originated frames, handed off to the dispatch
    /// loop (`crate::dispatch`) rather than matched to a waiting caller.
    unsolicited: std::sync::mpsc::Sender<Frame>,
}

impl Correlator {
    /// Build a correlator over `transport`. In [`CorrelationMode::Reentrant`]
    /// mode this spawns the dedicated receiver thread; in
    /// [`CorrelationMode::NonReentrant`] mode no thread is spawned and
    /// [`Self::call`] itself performs the blocking reads.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        mode: CorrelationMode,
        unsolicited: std::sync::mpsc::Sender<Frame>,
    ) -> Self {
        let shared = Arc::new(Shared {
            received: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
            closed: Mutex::new(None),
        });

        if mode == CorrelationMode::Reentrant {
            let receiver_transport = Arc::clone(&transport);
            let receiver_shared = Arc::clone(&shared);
            let receiver_unsolicited = unsolicited.clone();
            std::thread::spawn(move || {
                receiver_loop(&receiver_transport, &receiver_shared, &receiver_unsolicited);
            });
        }

        Self { transport, shared, mode, unsolicited }
    }

    /// Sends `frame` and blocks for the reply whose `request_id` matches,
    /// optionally bounded by `timeout` (spec.md §4.5: "purely
    /// caller-imposed; the correlator itself never times out on its
    /// own").
    ///
    /// # Errors
    ///
    /// [`ClientError::Closed`] if the connection has failed,
    /// [`ClientError::TimedOut`] if `timeout` elapses first, or any
    /// transport I/O error encountered while reading frames.
    pub fn call(
        &self,
        frame: &Frame,
        timeout: Option<Duration>,
    ) -> Result<Frame, ClientError> {
        let request_id = frame.header.request_id();
        self.transport.send_frame(frame)?;

        match self.mode {
            CorrelationMode::Reentrant => self.wait_for_reply(request_id, timeout),
            CorrelationMode::NonReentrant => self.pump_until_reply(request_id, timeout),
        }
    }

    fn wait_for_reply(
        &self,
        request_id: i32,
        timeout: Option<Duration>,
    ) -> Result<Frame, ClientError> {
        #[allow(clippy::unwrap_used)]
        let mut received = self.shared.received.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            if let Some(frame) = received.remove(&request_id) {
                return Ok(frame);
            }

            #[allow(clippy::unwrap_used)]
            if let Some(reason) = self.shared.closed.lock().unwrap().clone() {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    reason,
                )));
            }

            received = match deadline {
                None => {
                    #[allow(clippy::unwrap_used)]
                    self.shared.condvar.wait(received).unwrap()
                },
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::TimedOut);
                    }
                    #[allow(clippy::unwrap_used)]
                    let (guard, timed_out) =
                        self.shared.condvar.wait_timeout(received, remaining).unwrap();
                    if timed_out.timed_out() && !guard.contains_key(&request_id) {
                        return Err(ClientError::TimedOut);
                    }
                    guard
                },
            };
        }
    }

    fn pump_until_reply(
        &self,
        request_id: i32,
        timeout: Option<Duration>,
    ) -> Result<Frame, ClientError> {
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            {
                #[allow(clippy::unwrap_used)]
                let mut received = self.shared.received.lock().unwrap();
                if let Some(frame) = received.remove(&request_id) {
                    return Ok(frame);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ClientError::TimedOut);
                }
            }

            let frame = self.transport.recv_frame()?;
            self.route(frame);
        }
    }

    /// Routes one received frame: unsolicited requests go to the
    /// dispatch channel, everything else is stashed for its waiting
    /// caller (or picked up directly by [`Self::pump_until_reply`]).
    fn route(&self, frame: Frame) {
        if frame.header.request_id() == pjrmi_proto::message::UNSOLICITED_REQUEST_ID
            || is_unsolicited_type(frame.header.message_type())
        {
            let _ = self.unsolicited.send(frame);
            return;
        }

        #[allow(clippy::unwrap_used)]
        let mut received = self.shared.received.lock().unwrap();
        received.insert(frame.header.request_id(), frame);
        self.shared.condvar.notify_all();
    }

    /// Marks the correlator closed: every waiter currently blocked in
    /// [`Self::call`] is woken and observes [`ClientError::Io`] with
    /// `ConnectionAborted`.
    pub fn close(&self, reason: String) {
        #[allow(clippy::unwrap_used)]
        {
            *self.shared.closed.lock().unwrap() = Some(reason);
        }
        self.shared.condvar.notify_all();
    }
}

fn is_unsolicited_type(message_type: Option<MessageType>) -> bool {
    matches!(
        message_type,
        Some(
            MessageType::Callback
                | MessageType::EvalOrExec
                | MessageType::PythonInvoke
                | MessageType::ObjectCallback
                | MessageType::GetObject
                | MessageType::GetAttr
                | MessageType::SetGlobal
        )
    )
}

fn receiver_loop(
    transport: &Arc<dyn Transport>,
    shared: &Arc<Shared>,
    unsolicited: &std::sync::mpsc::Sender<Frame>,
) {
    loop {
        match transport.recv_frame() {
            Ok(frame) => {
                if frame.header.request_id() == pjrmi_proto::message::UNSOLICITED_REQUEST_ID
                    || is_unsolicited_type(frame.header.message_type())
                {
                    let _ = unsolicited.send(frame);
                    continue;
                }

                #[allow(clippy::unwrap_used)]
                let mut received = shared.received.lock().unwrap();
                received.insert(frame.header.request_id(), frame);
                shared.condvar.notify_all();
            },
            Err(err) => {
                #[allow(clippy::unwrap_used)]
                {
                    *shared.closed.lock().unwrap() = Some(err.to_string());
                }
                shared.condvar.notify_all();
                return;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::transport::InProcessTransport;

    #[test]
    fn reentrant_mode_delivers_a_matching_reply() {
        let (client_side, server_side) = InProcessTransport::pair();
        let (tx, _rx) = std::sync::mpsc::channel();
        let correlator =
            Correlator::new(Arc::new(client_side), CorrelationMode::Reentrant, tx);

        let responder = std::thread::spawn(move || {
            let request = server_side.recv_frame().unwrap();
            let reply = Frame::new(
                pjrmi_proto::FrameHeader::new(
                    MessageType::ObjectReference,
                    request.header.thread_id(),
                    request.header.request_id(),
                ),
                Bytes::from_static(b"reply"),
            );
            server_side.send_frame(&reply).unwrap();
        });

        let request = Frame::request(MessageType::MethodCall, 1, 42, Bytes::from_static(b"req"));
        let reply = correlator.call(&request, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"reply"));

        responder.join().unwrap();
    }

    #[test]
    fn non_reentrant_mode_stashes_frames_for_later_waiters() {
        let (client_side, server_side) = InProcessTransport::pair();
        let (tx, _rx) = std::sync::mpsc::channel();
        let correlator = Arc::new(Correlator::new(
            Arc::new(client_side),
            CorrelationMode::NonReentrant,
            tx,
        ));

        let responder = std::thread::spawn(move || {
            for _ in 0..2 {
                let request = server_side.recv_frame().unwrap();
                let reply = Frame::new(
                    pjrmi_proto::FrameHeader::new(
                        MessageType::ObjectReference,
                        request.header.thread_id(),
                        request.header.request_id(),
                    ),
                    Bytes::from_static(b"ok"),
                );
                server_side.send_frame(&reply).unwrap();
            }
        });

        let first = Frame::request(MessageType::MethodCall, 1, 1, Bytes::from_static(b"a"));
        let second = Frame::request(MessageType::MethodCall, 1, 2, Bytes::from_static(b"b"));

        let correlator_clone = Arc::clone(&correlator);
        let second_caller = std::thread::spawn(move || {
            correlator_clone.call(&second, Some(Duration::from_secs(5))).unwrap()
        });

        let reply = correlator.call(&first, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"ok"));

        let second_reply = second_caller.join().unwrap();
        assert_eq!(second_reply.payload, Bytes::from_static(b"ok"));

        responder.join().unwrap();
    }

    #[test]
    fn timeout_elapses_when_no_reply_arrives() {
        let (client_side, _server_side) = InProcessTransport::pair();
        let (tx, _rx) = std::sync::mpsc::channel();
        let correlator =
            Correlator::new(Arc::new(client_side), CorrelationMode::Reentrant, tx);

        let request = Frame::request(MessageType::MethodCall, 1, 9, Bytes::from_static(b"x"));
        let result = correlator.call(&request, Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(ClientError::TimedOut)));
    }
}
