//! Leading-and-trailing debounce over an mpsc channel.
//!
//! ```text
//! input   a b c d ·········· e ········· f g ···
//! output  a ········ d ····· e ········· f ···· g
//!         │← window →│       │← window →│
//! ```
//!
//! The first item of a burst passes straight through and opens a window.
//! Items arriving inside the window overwrite a single pending slot; when
//! the window closes the slot is emitted, if filled, and the stage goes
//! idle. No timer runs while idle.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

/// Debounces `src` with the given window.
///
/// The returned receiver closes after `src` closes and any pending item
/// has been flushed. Sending to the output waits for the consumer, so a
/// slow consumer throttles reads from `src`.
pub fn debounce<T: Send + 'static>(window: Duration, src: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(window, src, tx));
    rx
}

async fn run<T>(window: Duration, mut src: mpsc::Receiver<T>, dst: mpsc::Sender<T>) {
    let mut deadline: Option<Instant> = None;
    let mut pending: Option<T> = None;

    loop {
        tokio::select! {
            item = src.recv() => {
                let Some(item) = item else { break };

                if deadline.is_some() {
                    pending = Some(item);
                    continue;
                }
                if dst.send(item).await.is_err() {
                    return;
                }
                deadline = Some(Instant::now() + window);
            }
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Some(item) = pending.take() {
                    if dst.send(item).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    if let Some(item) = pending {
        let _ = dst.send(item).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_first_and_last() {
        let (tx, rx) = mpsc::channel(16);
        let mut out = debounce(WINDOW, rx);

        let started = Instant::now();
        for i in 0..5 {
            tx.try_send(i).unwrap();
        }

        assert_eq!(out.recv().await, Some(0));
        assert_eq!(out.recv().await, Some(4));
        let latency = started.elapsed();
        assert!(latency >= WINDOW && latency < WINDOW * 2, "{latency:?}");

        drop(tx);
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_events_pass_one_to_one() {
        let (tx, rx) = mpsc::channel(16);
        let mut out = debounce(WINDOW, rx);

        for i in 0..3 {
            tx.send(i).await.unwrap();
            assert_eq!(out.recv().await, Some(i));
            tokio::time::sleep(WINDOW * 2).await;
        }

        drop(tx);
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_item_is_flushed_on_close() {
        let (tx, rx) = mpsc::channel(16);
        let mut out = debounce(WINDOW, rx);

        for i in 0..3 {
            tx.try_send(i).unwrap();
        }
        drop(tx);

        assert_eq!(out.recv().await, Some(0));
        assert_eq!(out.recv().await, Some(2));
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_without_followers_emits_nothing_extra() {
        let (tx, rx) = mpsc::channel(16);
        let mut out = debounce(WINDOW, rx);

        tx.send("only").await.unwrap();
        assert_eq!(out.recv().await, Some("only"));

        let quiet = tokio::time::timeout(WINDOW * 3, out.recv()).await;
        assert!(quiet.is_err());
    }
}
