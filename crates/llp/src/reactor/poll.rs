//! `mio`-backed reactor

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token};

use super::{EventSubscription, Interest, ReadableCallback, SubscriptionId};
use crate::io::Descriptor;
use crate::with_lock;

const EVENTS_CAPACITY: usize = 64;

struct Handler {
    fd: RawFd,
    persistent: bool,
    callback: ReadableCallback,
}

/// Single-threaded reactor built on [`mio::Poll`]
///
/// Call [`PollReactor::turn`] (or [`PollReactor::run_until`]) from one
/// thread; every readiness notification gathered in a turn is dispatched on
/// that thread, one callback at a time. Subscribing and unsubscribing may
/// happen from any thread, including from inside a callback. Unsubscribing
/// from another thread while the callback runs blocks until it returns.
///
/// `mio` is edge-triggered. To give persistent subscriptions level-triggered
/// behaviour the descriptor is re-armed after each callback, so a socket that
/// still holds queued datagrams is reported again on the next turn.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use llp::reactor::PollReactor;
///
/// let reactor = Arc::new(PollReactor::new()?);
/// // ... initialize adapters against `reactor` ...
/// loop {
///     reactor.turn(Some(Duration::from_millis(100)))?;
/// }
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct PollReactor {
    poll: Mutex<Poll>,
    registry: Registry,
    handlers: Mutex<HashMap<Token, Handler>>,
    next_token: AtomicUsize,
    // callback currently running and the thread running it
    dispatching: Mutex<Option<(Token, ThreadId)>>,
    dispatch_done: Condvar,
}

/// Marks a callback as running until dropped.
struct Dispatch<'a> {
    reactor: &'a PollReactor,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        with_lock("PollReactor.dispatching", &self.reactor.dispatching, |mut dispatching| {
            *dispatching = None;
        });
        self.reactor.dispatch_done.notify_all();
    }
}

impl PollReactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            handlers: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(0),
            dispatching: Mutex::new(None),
            dispatch_done: Condvar::new(),
        })
    }

    /// Wait up to `timeout` (forever for `None`) for readiness and dispatch
    /// the callbacks. Returns how many callbacks ran.
    pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        {
            let polled = with_lock("PollReactor.poll", &self.poll, |mut poll| {
                poll.poll(&mut events, timeout)
            });
            match polled {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
                Err(e) => return Err(e),
            }
        }

        let mut dispatched = 0;
        for event in events.iter() {
            let token = event.token();
            // look the handler up again: an earlier callback in this turn may
            // have unsubscribed it
            let Some(callback) = with_lock("PollReactor.handlers", &self.handlers, |handlers| {
                let Some(handler) = handlers.get(&token) else {
                    return None;
                };
                let callback = handler.callback.clone();
                // marked while the handler is still registered, so a racing
                // unsubscribe either prevents this dispatch or waits for it
                with_lock("PollReactor.dispatching", &self.dispatching, |mut dispatching| {
                    *dispatching = Some((token, thread::current().id()));
                });
                Some(callback)
            }) else {
                tracing::trace!(?token, "skipping event for removed subscription");
                continue;
            };

            {
                let _running = Dispatch { reactor: self };
                callback();
            }
            dispatched += 1;

            with_lock("PollReactor.handlers", &self.handlers, |mut handlers| {
                let (fd, persistent) = match handlers.get(&token) {
                    Some(h) => (h.fd, h.persistent),
                    None => return,
                };
                if persistent {
                    if let Err(e) =
                        self.registry
                            .reregister(&mut SourceFd(&fd), token, mio::Interest::READABLE)
                    {
                        tracing::warn!(error = %e, fd, "re-arming subscription");
                    }
                } else if let Some(handler) = handlers.remove(&token) {
                    if let Err(e) = self.registry.deregister(&mut SourceFd(&handler.fd)) {
                        tracing::warn!(error = %e, fd = handler.fd, "removing one-shot subscription");
                    }
                }
            });
        }

        Ok(dispatched)
    }

    /// Run turns of at most `tick` until `stop` is set. Returns the total
    /// number of callbacks dispatched.
    pub fn run_until(&self, stop: &AtomicBool, tick: Duration) -> io::Result<u64> {
        let mut total = 0u64;
        while !stop.load(Ordering::SeqCst) {
            total += self.turn(Some(tick))? as u64;
        }
        tracing::debug!(dispatched = total, "reactor stopped");
        Ok(total)
    }

    /// Block while `token`'s callback runs on another thread.
    fn wait_for_dispatch(&self, token: Token) {
        let current = thread::current().id();
        let mut dispatching = self
            .dispatching
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while matches!(*dispatching, Some((running, thread)) if running == token && thread != current)
        {
            tracing::trace!(?token, "waiting for running callback");
            dispatching = self
                .dispatch_done
                .wait(dispatching)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn subscription_count(&self) -> usize {
        with_lock("PollReactor.handlers", &self.handlers, |handlers| {
            handlers.len()
        })
    }
}

impl EventSubscription for PollReactor {
    fn subscribe(
        &self,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadableCallback,
    ) -> io::Result<SubscriptionId> {
        if !interest.is_readable() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only readable interest is supported",
            ));
        }

        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = Token(id);
        with_lock("PollReactor.handlers", &self.handlers, |mut handlers| {
            self.registry
                .register(&mut SourceFd(&descriptor.0), token, mio::Interest::READABLE)?;
            handlers.insert(
                token,
                Handler {
                    fd: descriptor.0,
                    persistent: interest.is_persistent(),
                    callback,
                },
            );
            Ok::<_, io::Error>(())
        })?;

        tracing::debug!(%descriptor, subscription = id, "subscribed");
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> io::Result<()> {
        let token = Token(id.0);
        let handler = with_lock("PollReactor.handlers", &self.handlers, |mut handlers| {
            handlers.remove(&token)
        })
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown subscription {id}"))
        })?;
        let deregistered = self.registry.deregister(&mut SourceFd(&handler.fd));

        self.wait_for_dispatch(token);
        deregistered?;
        tracing::debug!(fd = handler.fd, subscription = id.0, "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, OnceLock};

    const TICK: Option<Duration> = Some(Duration::from_millis(200));

    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_nonblocking(true).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();
        (receiver, sender)
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> ReadableCallback {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn persistent_subscription_fires_each_turn_while_readable() {
        let reactor = PollReactor::new().unwrap();
        let (receiver, sender) = socket_pair();
        let count = Arc::new(AtomicUsize::new(0));

        reactor
            .subscribe(
                Descriptor(receiver.as_raw_fd()),
                Interest::READABLE | Interest::PERSIST,
                counting_callback(&count),
            )
            .unwrap();

        sender.send(b"a").unwrap();
        sender.send(b"b").unwrap();

        // the callback does not read, so the socket stays readable
        assert_eq!(reactor.turn(TICK).unwrap(), 1);
        assert_eq!(reactor.turn(TICK).unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(reactor.subscription_count(), 1);
    }

    #[test]
    fn one_shot_subscription_is_removed_after_firing() {
        let reactor = PollReactor::new().unwrap();
        let (receiver, sender) = socket_pair();
        let count = Arc::new(AtomicUsize::new(0));

        reactor
            .subscribe(
                Descriptor(receiver.as_raw_fd()),
                Interest::READABLE,
                counting_callback(&count),
            )
            .unwrap();
        sender.send(b"a").unwrap();

        assert_eq!(reactor.turn(TICK).unwrap(), 1);
        assert_eq!(reactor.subscription_count(), 0);
        assert_eq!(reactor.turn(Some(Duration::from_millis(20))).unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_descriptor_is_not_dispatched() {
        let reactor = PollReactor::new().unwrap();
        let (receiver, sender) = socket_pair();
        let count = Arc::new(AtomicUsize::new(0));

        let id = reactor
            .subscribe(
                Descriptor(receiver.as_raw_fd()),
                Interest::READABLE | Interest::PERSIST,
                counting_callback(&count),
            )
            .unwrap();
        reactor.unsubscribe(id).unwrap();
        sender.send(b"a").unwrap();

        assert_eq!(reactor.turn(Some(Duration::from_millis(20))).unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_subscription_is_an_error() {
        let reactor = PollReactor::new().unwrap();
        let err = reactor.unsubscribe(SubscriptionId(99)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn invalid_descriptor_is_rejected() {
        let reactor = PollReactor::new().unwrap();
        let result = reactor.subscribe(
            Descriptor(-1),
            Interest::READABLE | Interest::PERSIST,
            Arc::new(|| {}),
        );
        assert!(result.is_err());
        assert_eq!(reactor.subscription_count(), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let reactor = Arc::new(PollReactor::new().unwrap());
        let (receiver, sender) = socket_pair();
        let slot = Arc::new(OnceLock::new());

        let callback: ReadableCallback = {
            let reactor = Arc::downgrade(&reactor);
            let slot = Arc::clone(&slot);
            Arc::new(move || {
                if let (Some(reactor), Some(id)) = (reactor.upgrade(), slot.get()) {
                    reactor.unsubscribe(*id).unwrap();
                }
            })
        };
        let id = reactor
            .subscribe(
                Descriptor(receiver.as_raw_fd()),
                Interest::READABLE | Interest::PERSIST,
                callback,
            )
            .unwrap();
        slot.set(id).unwrap();
        sender.send(b"a").unwrap();

        assert_eq!(reactor.turn(TICK).unwrap(), 1);
        assert_eq!(reactor.subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_from_another_thread_waits_for_running_callback() {
        let reactor = Arc::new(PollReactor::new().unwrap());
        let (receiver, sender) = socket_pair();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let finished = Arc::new(AtomicBool::new(false));

        let callback: ReadableCallback = {
            let finished = Arc::clone(&finished);
            Arc::new(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                finished.store(true, Ordering::SeqCst);
            })
        };
        let id = reactor
            .subscribe(
                Descriptor(receiver.as_raw_fd()),
                Interest::READABLE | Interest::PERSIST,
                callback,
            )
            .unwrap();
        sender.send(b"a").unwrap();

        let dispatcher = {
            let reactor = Arc::clone(&reactor);
            thread::spawn(move || reactor.turn(Some(Duration::from_secs(5))))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let unsubscriber = {
            let reactor = Arc::clone(&reactor);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                reactor.unsubscribe(id).unwrap();
                finished.load(Ordering::SeqCst)
            })
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        assert!(
            unsubscriber.join().unwrap(),
            "unsubscribe returned while the callback was still running"
        );
        assert_eq!(dispatcher.join().unwrap().unwrap(), 1);
        assert_eq!(reactor.subscription_count(), 0);
    }

    #[test]
    fn run_until_stops() {
        let reactor = PollReactor::new().unwrap();
        let stop = AtomicBool::new(true);
        assert_eq!(reactor.run_until(&stop, Duration::from_millis(1)).unwrap(), 0);
    }
}
