//! Callback contract between the loop and the application.
//!
//! All hooks run on the loop thread, one at a time. A hook that blocks stalls
//! every other peer.
//!
//! Decisions also convert from the classic integer return codes, so callers
//! porting from a C-style callback table can keep returning `0` / `-1`.

use crate::peer::Peer;
use crate::reactor::context::LoopContext;

/// What to do with a freshly accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Watch the peer for messages (code `0`)
    Register,
    /// Close the socket right away (code `-1`)
    Close,
    /// Neither watch nor close: the peer is handed to
    /// [`Handler::on_detach`] (any other code)
    Detach,
}

impl From<i32> for ConnectDecision {
    fn from(code: i32) -> Self {
        match code {
            0 => ConnectDecision::Register,
            -1 => ConnectDecision::Close,
            _ => ConnectDecision::Detach,
        }
    }
}

/// What to do with a peer whose read failed or whose remote end closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Close and forget the peer (code `0`)
    Close,
    /// Leave it registered, e.g. to flush pending writes first (other codes)
    Keep,
}

impl From<i32> for ErrorDecision {
    fn from(code: i32) -> Self {
        match code {
            0 => ErrorDecision::Close,
            _ => ErrorDecision::Keep,
        }
    }
}

/// What to do with a peer after one of its messages was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDecision {
    /// Keep receiving (code `0`)
    Continue,
    /// Close the peer (other codes)
    Close,
}

impl From<i32> for MessageDecision {
    fn from(code: i32) -> Self {
        match code {
            0 => MessageDecision::Continue,
            _ => MessageDecision::Close,
        }
    }
}

/// Application callbacks. The handler value doubles as the user context: it
/// is reachable as `&mut self` from every hook.
///
/// Per-peer application state belongs in the handler, keyed by
/// [`Peer::id`](crate::Peer::id); table positions move when peers leave.
pub trait Handler {
    /// A listener accepted `peer`. The peer already sits in the table but is
    /// not watched until this returns [`ConnectDecision::Register`].
    fn on_connect(
        &mut self,
        ctx: &LoopContext<'_>,
        listener: &Peer,
        peer: &Peer,
    ) -> ConnectDecision {
        let _ = (ctx, listener, peer);
        ConnectDecision::Register
    }

    /// The peer hit a read/accept error or its remote end closed.
    fn on_error(&mut self, ctx: &LoopContext<'_>, peer: &Peer) -> ErrorDecision {
        let _ = (ctx, peer);
        ErrorDecision::Close
    }

    /// Bytes arrived. TCP data comes one read at a time with no framing; UDP
    /// data is exactly one datagram, its sender in [`Peer::source`].
    fn on_message(&mut self, ctx: &LoopContext<'_>, peer: &Peer, data: &[u8]) -> MessageDecision;

    /// The wait timed out with nothing ready.
    fn on_timer(&mut self, ctx: &LoopContext<'_>) {
        let _ = ctx;
    }

    /// The loop removed `peer`; its socket closes right after this returns.
    fn on_close(&mut self, ctx: &LoopContext<'_>, peer: &Peer) {
        let _ = (ctx, peer);
    }

    /// Receives ownership of a peer rejected with [`ConnectDecision::Detach`].
    /// Dropping it closes the socket.
    fn on_detach(&mut self, ctx: &LoopContext<'_>, peer: Peer) {
        let _ = ctx;
        drop(peer);
    }
}
