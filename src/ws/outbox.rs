//! Outbound path of one connection.
//!
//! One-off replies (registration, errors) are queued in order. Match state
//! is not queued: once the connection follows a match, the writer always
//! picks up the newest state when it is ready to send, so a slow socket
//! skips intermediate ticks instead of falling behind.

use tokio::sync::{mpsc, watch};

use crate::ws::protocol::ServerMsg;

enum Outbound {
    Message(ServerMsg),
    Follow(watch::Receiver<ServerMsg>),
}

/// Sending half, owned by the session
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

/// Receiving half, drained by the socket writer
pub struct OutboxReceiver {
    rx: mpsc::Receiver<Outbound>,
    group: Option<watch::Receiver<ServerMsg>>,
    /// The followed state has not been handed out since it last changed
    fresh: bool,
}

pub fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Outbox { tx },
        OutboxReceiver {
            rx,
            group: None,
            fresh: false,
        },
    )
}

impl Outbox {
    /// Queue a one-off message. False once the receiving half is gone.
    pub async fn send(&self, msg: ServerMsg) -> bool {
        self.tx.send(Outbound::Message(msg)).await.is_ok()
    }

    /// Start streaming a match's state after everything queued so far.
    /// The state current when the writer gets here is sent first.
    pub async fn follow(&self, group: watch::Receiver<ServerMsg>) -> bool {
        self.tx.send(Outbound::Follow(group)).await.is_ok()
    }
}

enum Next {
    Queued(Option<Outbound>),
    Changed(bool),
}

impl OutboxReceiver {
    /// Next message to write; `None` when the session is gone
    pub async fn recv(&mut self) -> Option<ServerMsg> {
        loop {
            if let Some(state) = self.take_fresh() {
                return Some(state);
            }

            let next = tokio::select! {
                biased;
                item = self.rx.recv() => Next::Queued(item),
                changed = group_changed(&mut self.group) => Next::Changed(changed),
            };

            match next {
                Next::Queued(None) => return None,
                Next::Queued(Some(Outbound::Message(msg))) => return Some(msg),
                Next::Queued(Some(Outbound::Follow(group))) => self.follow(group),
                Next::Changed(true) => self.fresh = true,
                // match dropped its sender
                Next::Changed(false) => self.group = None,
            }
        }
    }

    /// Non-blocking [`recv`](Self::recv)
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<ServerMsg> {
        loop {
            if let Some(state) = self.take_fresh() {
                return Some(state);
            }
            match self.rx.try_recv() {
                Ok(Outbound::Message(msg)) => return Some(msg),
                Ok(Outbound::Follow(group)) => self.follow(group),
                Err(_) => break,
            }
        }

        if let Some(group) = &self.group {
            self.fresh = group.has_changed().unwrap_or(false);
        }
        self.take_fresh()
    }

    fn follow(&mut self, group: watch::Receiver<ServerMsg>) {
        self.group = Some(group);
        self.fresh = true;
    }

    fn take_fresh(&mut self) -> Option<ServerMsg> {
        if !std::mem::take(&mut self.fresh) {
            return None;
        }
        self.group
            .as_mut()
            .map(|group| group.borrow_and_update().clone())
    }
}

async fn group_changed(group: &mut Option<watch::Receiver<ServerMsg>>) -> bool {
    match group {
        Some(group) => group.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
