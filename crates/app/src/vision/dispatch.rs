//! Capacity-one handoff between the frame loop and the classification worker.
//!
//! `offer` never blocks: when the slot is occupied the stale item is pulled
//! back out and replaced, so the consumer always sees the newest frame. `take`
//! blocks until something arrives or every producer handle is gone.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OfferOutcome {
    /// The slot was empty.
    Queued,
    /// An unconsumed item was discarded in favour of this one.
    Replaced,
}

impl OfferOutcome {
    pub(crate) fn label(self) -> &'static str {
        match self {
            OfferOutcome::Queued => "queued",
            OfferOutcome::Replaced => "replaced",
        }
    }
}

pub(crate) struct DispatchSender<T> {
    tx: Sender<T>,
    // Producer-side handle on the slot so a stale item can be evicted.
    evict: Receiver<T>,
}

pub(crate) struct DispatchReceiver<T> {
    rx: Receiver<T>,
}

pub(crate) fn dispatch_queue<T>() -> (DispatchSender<T>, DispatchReceiver<T>) {
    let (tx, rx) = bounded(1);
    (
        DispatchSender {
            tx,
            evict: rx.clone(),
        },
        DispatchReceiver { rx },
    )
}

impl<T> DispatchSender<T> {
    pub(crate) fn offer(&self, item: T) -> OfferOutcome {
        let mut pending = item;
        let mut outcome = OfferOutcome::Queued;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    match self.evict.try_recv() {
                        Ok(_stale) => outcome = OfferOutcome::Replaced,
                        // The consumer took it between our send and evict.
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return outcome,
                    }
                }
                // Unreachable while `evict` is alive; treat as dropped.
                Err(TrySendError::Disconnected(_)) => return outcome,
            }
        }
    }
}

impl<T> DispatchReceiver<T> {
    /// Block until an item is available; `None` once all producers are dropped.
    pub(crate) fn take(&self) -> Option<T> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn only_the_last_offer_is_observable() {
        let (tx, rx) = dispatch_queue();
        assert_eq!(tx.offer(1), OfferOutcome::Queued);
        for n in 2..=50 {
            assert_eq!(tx.offer(n), OfferOutcome::Replaced);
        }
        assert_eq!(rx.take(), Some(50));

        drop(tx);
        assert_eq!(rx.take(), None);
    }

    #[test]
    fn offers_never_block_without_a_consumer() {
        let (tx, rx) = dispatch_queue();
        let started = std::time::Instant::now();
        for n in 0..10_000 {
            tx.offer(n);
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(rx.take(), Some(9_999));
    }

    #[test]
    fn take_blocks_until_offer() {
        let (tx, rx) = dispatch_queue();
        let consumer = thread::spawn(move || rx.take());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(tx.offer("frame"), OfferOutcome::Queued);
        assert_eq!(consumer.join().unwrap(), Some("frame"));
    }

    #[test]
    fn consumer_sees_newest_after_burst() {
        let (tx, rx) = dispatch_queue();
        tx.offer(1);
        assert_eq!(rx.take(), Some(1));
        tx.offer(2);
        tx.offer(3);
        assert_eq!(rx.take(), Some(3));
    }
}
