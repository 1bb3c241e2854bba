//! Event subscription interface
//!
//! The adapter does not poll its socket. It subscribes the socket's
//! [`Descriptor`] with an [`EventSubscription`] implementation and is called
//! back from that implementation's dispatch loop whenever the descriptor is
//! readable.
//!
//! Dispatch is single-threaded and cooperative: a callback runs to
//! completion inside the dispatch turn, so it must not block, and two
//! notifications for the same subscription are never handled concurrently.
//!
//! Two implementations ship with the crate:
//!
//! - [`PollReactor`], backed by `mio`, for real sockets
//! - [`ManualReactor`](crate::testing::ManualReactor), where tests fire
//!   notifications by hand

use std::fmt;
use std::io;
use std::ops::BitOr;
use std::sync::Arc;

use crate::io::Descriptor;

mod poll;

pub use poll::PollReactor;

/// Callback invoked once per readability notification.
pub type ReadableCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle to one registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub usize);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Set of conditions a subscription cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// Notify when the descriptor is readable.
    pub const READABLE: Interest = Interest(0b01);
    /// Keep the subscription after a notification. Without it the
    /// subscription is removed once it has fired.
    pub const PERSIST: Interest = Interest(0b10);

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_persistent(self) -> bool {
        self.0 & Self::PERSIST.0 != 0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self::Output {
        Interest(self.0 | rhs.0)
    }
}

/// Reactor-side registry of readability callbacks.
pub trait EventSubscription: Send + Sync {
    /// Register `callback` to run when `descriptor` becomes readable.
    fn subscribe(
        &self,
        descriptor: Descriptor,
        interest: Interest,
        callback: ReadableCallback,
    ) -> io::Result<SubscriptionId>;

    /// Remove a registration. After this returns the callback is not invoked
    /// again, even for a notification already gathered in the current turn.
    /// Called from another thread while the callback runs, it returns only
    /// once the callback has finished.
    fn unsubscribe(&self, id: SubscriptionId) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_combines() {
        let interest = Interest::READABLE | Interest::PERSIST;
        assert!(interest.is_readable());
        assert!(interest.is_persistent());
        assert!(interest.contains(Interest::READABLE));
        assert!(!Interest::READABLE.is_persistent());
        assert!(!Interest::default().is_readable());
    }

    #[test]
    fn subscription_display() {
        assert_eq!(SubscriptionId(3).to_string(), "sub#3");
    }
}
