// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Pull-based read/write/end over a push-based transport stream.
//!
//! A transport feeds a [`StreamEmitter`] with data, end and error events as they arrive.
//! The caller holds the matching [`StreamCall`] and pulls messages with [`StreamCall::read`].
//! Between the two runs a small task that owns the stream state: arrived-but-unread
//! messages wait in a buffer, and reads that arrive before any message wait in a queue of
//! pending readers. The two queues are never both non-empty.
//!
//! An error goes to the oldest pending reader, or to the next read when nobody is waiting.
//! Once a stream failed, the transport dropping its emitter is not an end: later reads stay
//! pending until the transport explicitly ends the stream or the call is dropped.

use crate::endpoint::{Message, MethodKind};
use crate::error::RpcError;
use futures::channel::mpsc as request_mpsc;
use futures::Stream;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// The outcome of one read: a message, `None` once the stream ended, or a classified error.
pub type StreamRead = Result<Option<Message>, RpcError>;

/// Messages the caller writes, as the transport consumes them.
pub type RequestStream = request_mpsc::UnboundedReceiver<Message>;

type Waiter = oneshot::Sender<StreamRead>;

/// What a transport observes on an open streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A response message arrived.
    Data(Message),
    /// The response stream finished.
    End,
    /// The call failed.
    Error(RpcError),
}

/// Buffer and pending-reader bookkeeping of one streaming call.
#[derive(Default)]
pub(crate) struct StreamState {
    buffered: VecDeque<Message>,
    waiters: VecDeque<Waiter>,
    ended: bool,
    failed: bool,
    undelivered: Option<RpcError>,
}

impl StreamState {
    pub(crate) fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Data(message) => self.on_data(message),
            StreamEvent::End => self.on_end(),
            StreamEvent::Error(error) => self.on_error(error),
        }
    }

    pub(crate) fn on_read(&mut self, waiter: Waiter) {
        if let Some(message) = self.buffered.pop_front() {
            if let Err(Ok(Some(message))) = waiter.send(Ok(Some(message))) {
                // reader went away, keep the message for the next one
                self.buffered.push_front(message);
            }
        } else if let Some(error) = self.undelivered.take() {
            if let Err(Err(error)) = waiter.send(Err(error)) {
                self.undelivered = Some(error);
            }
        } else if self.ended {
            let _ = waiter.send(Ok(None));
        } else {
            self.waiters.push_back(waiter);
        }
    }

    fn on_data(&mut self, mut message: Message) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(Some(message))) {
                Ok(()) => return,
                Err(Ok(Some(returned))) => message = returned,
                Err(_) => return,
            }
        }
        self.buffered.push_back(message);
    }

    fn on_end(&mut self) {
        self.ended = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(None));
        }
    }

    fn on_error(&mut self, mut error: RpcError) {
        self.failed = true;
        // only the oldest live reader observes the error
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Err(error)) {
                Ok(()) => return,
                Err(Err(returned)) => error = returned,
                Err(_) => return,
            }
        }
        debug!("[MESHLINK] stream error held for the next reader: {error}");
        self.undelivered = Some(error);
    }

    /// The transport dropped its emitter.
    fn on_closed(&mut self) {
        if !self.failed {
            self.on_end();
        }
    }

    #[cfg(test)]
    fn queues(&self) -> (usize, usize) {
        (self.buffered.len(), self.waiters.len())
    }
}

/// The transport's handle on an open [`StreamCall`].
#[derive(Clone, Debug)]
pub struct StreamEmitter {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamEmitter {
    /// Delivers a response message. Returns `false` once nobody can read anymore.
    pub fn data(&self, message: Message) -> bool {
        self.emit(StreamEvent::Data(message))
    }

    /// Marks the response stream as finished.
    pub fn end(&self) {
        self.emit(StreamEvent::End);
    }

    /// Reports a classified failure.
    pub fn error(&self, error: RpcError) {
        self.emit(StreamEvent::Error(error));
    }

    /// Delivers any event.
    pub fn emit(&self, event: StreamEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Whether the reading side is gone.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// An open streaming call, as handed to the caller.
pub struct StreamCall {
    kind: MethodKind,
    sink: request_mpsc::UnboundedSender<Message>,
    reads: mpsc::UnboundedSender<Waiter>,
}

impl StreamCall {
    /// Opens the read/write halves of a call of the given shape.
    ///
    /// The transport keeps the [`StreamEmitter`] and consumes the [`RequestStream`]; the
    /// [`StreamCall`] goes to the caller. Must be called within a tokio runtime.
    pub fn open(kind: MethodKind) -> (StreamCall, StreamEmitter, RequestStream) {
        let (sink, requests) = request_mpsc::unbounded();
        let (reads, read_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(read_rx, event_rx));
        (StreamCall { kind, sink, reads }, StreamEmitter { events }, requests)
    }

    /// The shape of the call.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Sends one request message.
    pub fn write(&self, message: Message) -> Result<(), RpcError> {
        if !self.kind.has_request_stream() {
            return Err(RpcError::failed_precondition(format!("{:?} call does not accept writes", self.kind)));
        }
        self.sink
            .unbounded_send(message)
            .map_err(|_| RpcError::failed_precondition("request stream already ended"))
    }

    /// Waits for the next response message.
    ///
    /// Returns `Ok(None)` once the stream ended. A client-streaming call answers its single
    /// response here after [`StreamCall::end`].
    pub async fn read(&self) -> StreamRead {
        let (waiter, answer) = oneshot::channel();
        if self.reads.send(waiter).is_err() {
            return Ok(None);
        }
        answer.await.unwrap_or(Ok(None))
    }

    /// Closes the request stream. Reads keep working.
    pub fn end(&self) {
        if self.kind.has_request_stream() {
            self.sink.close_channel();
        }
    }

    /// Adapts the call into a [`Stream`] that finishes on stream end or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Message, RpcError>> + Send + 'static {
        futures::stream::unfold(Some(self), |call| async move {
            let call = call?;
            match call.read().await {
                Ok(Some(message)) => Some((Ok(message), Some(call))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

impl fmt::Debug for StreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCall").field("kind", &self.kind).finish()
    }
}

async fn drive(mut reads: mpsc::UnboundedReceiver<Waiter>, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
    let mut state = StreamState::default();
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            event = events.recv(), if events_open => match event {
                Some(event) => state.on_event(event),
                None => {
                    events_open = false;
                    state.on_closed();
                },
            },
            waiter = reads.recv() => match waiter {
                Some(waiter) => state.on_read(waiter),
                None => break,
            },
        }
    }
    trace!("[MESHLINK] stream driver finished");
}
