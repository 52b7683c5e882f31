//! Per-connection correlation of frontend requests with backend outcomes.
//!
//! Each proxied connection has two `WireObserver`s, one per direction,
//! sharing a single `QueryCorrelator`. The correlator keeps a FIFO of
//! queries whose outcome has not arrived yet: a non-empty Parse pushes to
//! the tail, Bind attaches to the tail (the most recently parsed entry),
//! and backend outcomes retire from the head. The asymmetry matches the
//! pipelined extended protocol, where the frontend may issue several
//! Parse/Bind pairs before the backend answers the oldest one.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use pgscope_common::{Query, QuerySink};

use super::message::{
    BindMessage, CommandCompleteMessage, ErrorResponseMessage, Message, ParseMessage,
};
use super::packet::{Origin, PacketAssembler};
use crate::metrics;

/// A query awaiting its outcome. Exactly one of `error` / `complete` is set
/// when the entry is retired.
#[derive(Debug)]
struct PendingQuery {
    parse: ParseMessage,
    bind: Option<BindMessage>,
    error: Option<ErrorResponseMessage>,
    complete: Option<CommandCompleteMessage>,
}

impl PendingQuery {
    fn new(parse: ParseMessage) -> Self {
        Self {
            parse,
            bind: None,
            error: None,
            complete: None,
        }
    }
}

/// Correlation state shared by the two direction observers of a connection.
///
/// The FIFO is the only shared mutable state per connection; both observers
/// mutate it under the mutex. The sink is invoked after the lock is
/// released.
pub struct QueryCorrelator {
    pending: Mutex<VecDeque<PendingQuery>>,
    sink: Arc<dyn QuerySink>,
}

impl QueryCorrelator {
    pub fn new(sink: Arc<dyn QuerySink>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            sink,
        }
    }

    /// Advance the correlation state with one observed message.
    pub fn observe(&self, message: Message) {
        match message {
            Message::Parse(parse) => {
                // Some frontends send a Parse with an empty query that never
                // receives a CommandComplete; those are not tracked.
                if parse.query.is_empty() {
                    return;
                }
                self.pending.lock().push_back(PendingQuery::new(parse));
            }
            Message::Bind(bind) => {
                if let Some(tail) = self.pending.lock().back_mut() {
                    tail.bind = Some(bind);
                }
            }
            Message::ErrorResponse(error) => {
                let head = self.pending.lock().pop_front();
                let Some(mut head) = head else {
                    metrics::OUTCOMES_DROPPED.inc();
                    debug!("ErrorResponse without a pending query, dropped");
                    return;
                };
                head.error = Some(error);
                self.emit(head);
            }
            Message::CommandComplete(complete) => {
                let head = self.pending.lock().pop_front();
                let Some(mut head) = head else {
                    metrics::OUTCOMES_DROPPED.inc();
                    debug!("CommandComplete without a pending query, dropped");
                    return;
                };
                head.complete = Some(complete);
                self.emit(head);
            }
        }
    }

    fn emit(&self, entry: PendingQuery) {
        let outcome = if entry.error.is_some() {
            "failed"
        } else {
            "completed"
        };
        metrics::QUERIES_OBSERVED.with_label_values(&[outcome]).inc();
        debug!(
            query = %entry.parse.query,
            bound = entry.bind.is_some(),
            tag = entry.complete.as_ref().map(|c| c.tag.as_str()).unwrap_or(""),
            outcome,
            "query retired"
        );

        let record = match entry.error {
            Some(error) => Query::failed(entry.parse.query, error.message),
            None => Query::completed(entry.parse.query),
        };
        self.sink.write(&record);
    }
}

/// One direction's observer: reassembles the tee'd byte stream and feeds
/// decoded messages into the shared correlator.
pub struct WireObserver {
    assembler: PacketAssembler,
    correlator: Arc<QueryCorrelator>,
    origin: Origin,
}

impl WireObserver {
    pub fn new(origin: Origin, correlator: Arc<QueryCorrelator>, warn_bytes: usize) -> Self {
        Self {
            assembler: PacketAssembler::new(origin, warn_bytes),
            correlator,
            origin,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Feed one forwarded chunk. Runs synchronously: when the chunk
    /// completes a packet, message extraction and correlation updates have
    /// finished by the time this returns.
    pub fn observe(&mut self, chunk: &[u8]) {
        if let Some(packet) = self.assembler.append(chunk) {
            metrics::PACKETS_ASSEMBLED
                .with_label_values(&[self.origin.as_str()])
                .inc();
            for message in packet.messages() {
                self.correlator.observe(message);
            }
        }
    }
}
