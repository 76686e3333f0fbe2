//! Per-subscriber state held by the registry: WebSocket connection handles
//! and long-poll waiter buffers.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Utf8Bytes};
use eventgate_core::error::CoreError;
use eventgate_core::types::{CompanyId, UserId};
use eventgate_events::Event;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::ws::protocol::Outbound;

pub type ConnectionId = Uuid;

/// Close codes outside the IANA range used by the gateway.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4001;
pub const CLOSE_TENANT_FORBIDDEN: u16 = 4003;
pub const CLOSE_SLOW_CONSUMER: u16 = 4008;

/// Why the server is closing a WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    IdleTimeout,
    SlowConsumer,
    Shutdown,
    AuthenticationFailed,
    TenantForbidden,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal | CloseReason::IdleTimeout => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::AuthenticationFailed => CLOSE_AUTHENTICATION_FAILED,
            CloseReason::TenantForbidden => CLOSE_TENANT_FORBIDDEN,
            CloseReason::SlowConsumer => CLOSE_SLOW_CONSUMER,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal closure",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::Shutdown => "server shutdown",
            CloseReason::AuthenticationFailed => "authentication failed",
            CloseReason::TenantForbidden => "tenant forbidden",
        }
    }

    /// Close reason for a failed authentication attempt.
    pub fn for_auth_error(err: &CoreError) -> Self {
        match err {
            CoreError::Forbidden(_) => CloseReason::TenantForbidden,
            _ => CloseReason::AuthenticationFailed,
        }
    }

    pub fn frame(self) -> CloseFrame {
        CloseFrame {
            code: self.code(),
            reason: Utf8Bytes::from_static(self.reason()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Registry-side handle to one active WebSocket connection.
///
/// Dispatch pushes onto `queue` without blocking. Closing cancels `closer`,
/// which both connection tasks select on.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    company_id: CompanyId,
    queue: mpsc::Sender<Outbound>,
    closer: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        user_id: UserId,
        company_id: CompanyId,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (queue, rx) = mpsc::channel(queue_size.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            company_id,
            queue,
            closer: CancellationToken::new(),
            close_reason: Mutex::new(None),
        };
        (Arc::new(handle), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub(crate) fn try_send(
        &self,
        item: Outbound,
    ) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.queue.try_send(item)
    }

    /// Request close. The first reason recorded wins.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closer.cancelled()
    }
}

// ---------------------------------------------------------------------------
// Poll waiters
// ---------------------------------------------------------------------------

/// Events collected for one long-poll request.
#[derive(Debug, Default)]
pub struct PollBatch {
    pub events: Vec<Arc<Event>>,
    /// Events arrived after the buffer was full and were dropped.
    pub has_more: bool,
}

#[derive(Debug, Default)]
struct WaiterBuffer {
    events: Vec<Arc<Event>>,
    overflowed: bool,
    closed: bool,
}

/// Buffer shared between the registry (producer) and one poll request.
#[derive(Debug)]
pub struct WaiterShared {
    company_id: CompanyId,
    capacity: usize,
    buffer: Mutex<WaiterBuffer>,
    notify: Notify,
}

impl WaiterShared {
    pub(crate) fn new(company_id: CompanyId, capacity: usize) -> Self {
        Self {
            company_id,
            capacity: capacity.max(1),
            buffer: Mutex::new(WaiterBuffer::default()),
            notify: Notify::new(),
        }
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    /// Buffer an event. Returns `false` when the buffer is full.
    pub(crate) fn offer(&self, event: Arc<Event>) -> bool {
        let accepted = {
            let mut buffer = self.buffer.lock();
            if buffer.events.len() < self.capacity {
                buffer.events.push(event);
                true
            } else {
                buffer.overflowed = true;
                false
            }
        };
        // notify_one stores a permit when nobody is waiting yet.
        self.notify.notify_one();
        accepted
    }

    pub(crate) fn close(&self) {
        self.buffer.lock().closed = true;
        self.notify.notify_one();
    }

    /// Take buffered events if any arrived or the waiter was closed.
    pub(crate) fn take_ready(&self) -> Option<PollBatch> {
        let mut buffer = self.buffer.lock();
        if buffer.events.is_empty() && !buffer.closed {
            return None;
        }
        Some(PollBatch {
            events: std::mem::take(&mut buffer.events),
            has_more: std::mem::take(&mut buffer.overflowed),
        })
    }

    pub(crate) fn take(&self) -> PollBatch {
        let mut buffer = self.buffer.lock();
        PollBatch {
            events: std::mem::take(&mut buffer.events),
            has_more: std::mem::take(&mut buffer.overflowed),
        }
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}
