//! Event emitter.
//!
//! [`EventSink`] is the only path through which the turn pipeline sends
//! [`StreamEvent`]s to a client. It enforces the terminal contract (nothing
//! follows `done` or `error`) and turns a dropped receiver into a
//! cancellation signal the pipeline can observe.

use tokio::sync::mpsc;

use mm_domain::stream::StreamEvent;

/// Terminal-contract guard over the turn's event channel.
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    terminal_sent: bool,
    cancelled: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            terminal_sent: false,
            cancelled: false,
        }
    }

    /// Send one event. Returns `false` once the client is gone; callers
    /// should stop producing when that happens.
    ///
    /// Events after a terminal are a pipeline bug upstream; they are logged
    /// and dropped rather than forwarded.
    pub async fn send(&mut self, event: StreamEvent) -> bool {
        if self.cancelled {
            return false;
        }
        if self.terminal_sent {
            tracing::warn!(event = ?event, "event after terminal suppressed");
            return true;
        }

        let terminal = event.is_terminal();
        if self.tx.send(event).await.is_err() {
            self.cancelled = true;
            return false;
        }
        if terminal {
            self.terminal_sent = true;
        }
        true
    }

    /// Whether the client disconnected mid-stream.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether a terminal event was delivered.
    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
