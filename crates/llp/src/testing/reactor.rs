//! Hand-driven reactor for testing.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::io::Descriptor;
use crate::reactor::{EventSubscription, Interest, ReadableCallback, SubscriptionId};
use crate::with_lock;

/// Registry change recorded by [`ManualReactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Subscribed(SubscriptionId, Descriptor),
    Unsubscribed(SubscriptionId, Descriptor),
}

struct Entry {
    descriptor: Descriptor,
    interest: Interest,
    callback: ReadableCallback,
}

/// Reactor that never polls.
///
/// Tests decide when a descriptor "is readable" by calling
/// [`ManualReactor::fire`] or [`ManualReactor::fire_all`]. Callbacks run on
/// the calling thread with no internal lock held, so they may subscribe or
/// unsubscribe. Fire and unsubscribe from the same thread: an unsubscribe
/// does not wait for a callback running elsewhere.
#[derive(Default)]
pub struct ManualReactor {
    entries: Mutex<BTreeMap<SubscriptionId, Entry>>,
    history: Mutex<Vec<SubscriptionEvent>>,
    next_id: AtomicUsize,
}

impl ManualReactor {
    /// Deliver one readability notification to `id`. Returns false if `id`
    /// is not subscribed.
    pub fn fire(&self, id: SubscriptionId) -> bool {
        let Some((callback, persistent)) = with_lock("ManualReactor.entries", &self.entries, |entries| {
            entries
                .get(&id)
                .map(|e| (e.callback.clone(), e.interest.is_persistent()))
        }) else {
            return false;
        };

        if !persistent {
            self.remove(id);
        }
        callback();
        true
    }

    /// Deliver one notification to every current subscription, in
    /// subscription order. Returns how many callbacks ran.
    pub fn fire_all(&self) -> usize {
        self.subscriptions()
            .into_iter()
            .filter(|id| self.fire(*id))
            .count()
    }

    /// Deliver one notification to whatever is subscribed for `descriptor`.
    pub fn fire_descriptor(&self, descriptor: Descriptor) -> bool {
        let id = with_lock("ManualReactor.entries", &self.entries, |entries| {
            entries
                .iter()
                .find(|(_, e)| e.descriptor == descriptor)
                .map(|(id, _)| *id)
        });
        id.is_some_and(|id| self.fire(id))
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        with_lock("ManualReactor.entries", &self.entries, |entries| {
            entries.keys().copied().collect()
        })
    }

    pub fn is_subscribed(&self, descriptor: Descriptor) -> bool {
        with_lock("ManualReactor.entries", &self.entries, |entries| {
            entries.values().any(|e| e.descriptor == descriptor)
        })
    }

    pub fn interest(&self, id: SubscriptionId) -> Option<Interest> {
        with_lock("ManualReactor.entries", &self.entries, |entries| {
            entries.get(&id).map(|e| e.interest)
        })
    }

    /// Every subscribe and unsubscribe so far, oldest first.
    pub fn history(&self) -> Vec<SubscriptionEvent> {
        with_lock("ManualReactor.history", &self.history, |history| {
            history.clone()
        })
    }

    fn remove(&self, id: SubscriptionId) -> Option<Entry> {
        let entry = with_lock("ManualReactor.entries", &self.entries, |mut entries| {
            entries.remove(&id)
        })?;
        with_lock("ManualReactor.history", &self.history, |mut history| {
            history.push(SubscriptionEvent::Unsubscribed(id, entry.descriptor))
        });
        Some(entry)
    }
}

impl EventSubscription for ManualReactor {
    fn subscribe(
        &self,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadableCallback,
    ) -> io::Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        with_lock("ManualReactor.entries", &self.entries, |mut entries| {
            entries.insert(
                id,
                Entry {
                    descriptor,
                    interest,
                    callback,
                },
            )
        });
        with_lock("ManualReactor.history", &self.history, |mut history| {
            history.push(SubscriptionEvent::Subscribed(id, descriptor))
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> io::Result<()> {
        self.remove(id).map(|_| ()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown subscription {id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, ReadableCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn persistent_subscription_survives_firing() {
        let reactor = ManualReactor::default();
        let (count, callback) = counter();
        let id = reactor
            .subscribe(Descriptor(3), Interest::READABLE | Interest::PERSIST, callback)
            .unwrap();

        assert!(reactor.fire(id));
        assert!(reactor.fire(id));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(reactor.subscriptions(), vec![id]);
    }

    #[test]
    fn one_shot_subscription_is_removed() {
        let reactor = ManualReactor::default();
        let (count, callback) = counter();
        let id = reactor
            .subscribe(Descriptor(3), Interest::READABLE, callback)
            .unwrap();

        assert!(reactor.fire(id));
        assert!(!reactor.fire(id));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            reactor.history(),
            vec![
                SubscriptionEvent::Subscribed(id, Descriptor(3)),
                SubscriptionEvent::Unsubscribed(id, Descriptor(3)),
            ]
        );
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let reactor = Arc::new(ManualReactor::default());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));
        let callback: ReadableCallback = {
            let reactor = Arc::clone(&reactor);
            let slot = Arc::clone(&slot);
            Arc::new(move || {
                if let Some(id) = slot.lock().unwrap().take() {
                    reactor.unsubscribe(id).unwrap();
                }
            })
        };
        let id = reactor
            .subscribe(Descriptor(9), Interest::READABLE | Interest::PERSIST, callback)
            .unwrap();
        *slot.lock().unwrap() = Some(id);

        assert!(reactor.fire_descriptor(Descriptor(9)));
        assert!(!reactor.is_subscribed(Descriptor(9)));
    }

    #[test]
    fn unknown_unsubscribe_fails() {
        let reactor = ManualReactor::default();
        assert_eq!(
            reactor.unsubscribe(SubscriptionId(5)).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
