//! The injected persistence seam.
//!
//! Durability is best-effort: the in-memory history is authoritative, and a
//! save failure is logged by the caller and never propagated. Swapping the
//! function swaps the strategy (synchronous, queued-async, no-op) without
//! touching history management.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::Message;

/// Persistence callback invoked for every message appended with
/// `persist = true`.
pub type SaveFn = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// A save function that discards messages (tests, history replay).
pub fn noop_save_fn() -> SaveFn {
    Arc::new(|_| Ok(()))
}

/// The default strategy: hand the message to an asynchronous delivery
/// channel and return immediately, decoupling conversation flow from
/// storage latency. The receiving end owns actual storage.
pub fn queued_save_fn(tx: mpsc::UnboundedSender<Message>) -> SaveFn {
    Arc::new(move |message| {
        tx.send(message.clone())
            .map_err(|_| anyhow::anyhow!("persistence channel closed"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> Message {
        Message {
            session_id: "s1".into(),
            content: content.into(),
            author_name: "alice".into(),
            is_user: true,
        }
    }

    #[test]
    fn noop_always_succeeds() {
        let save = noop_save_fn();
        assert!(save(&message("Hi")).is_ok());
    }

    #[tokio::test]
    async fn queued_delivers_to_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let save = queued_save_fn(tx);

        save(&message("Hi")).unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.content, "Hi");
    }

    #[tokio::test]
    async fn queued_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let save = queued_save_fn(tx);

        assert!(save(&message("Hi")).is_err());
    }
}
