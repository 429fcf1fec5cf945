//! Session lifecycle.
//!
//! A session owns one kernel channel and drives it through its life:
//!
//! ```text
//! Created -> Negotiating -> Active -> Exiting -> Closed
//! ```
//!
//! The first message must be `FUSE_INIT`; until the handshake settles,
//! every other request is answered `EIO`. Once active, requests are
//! dispatched concurrently while replies funnel through a single writer so
//! each one hits the channel in one atomic write. Exit is one-way and
//! idempotent: unmount, `FUSE_DESTROY`, a fatal channel error, and
//! [`Session::exit`] all converge on the same flag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fusebridge_proto::{decode, FuseInHeader, FuseInitIn, FuseOpcode};

use crate::channel::{Channel, Received};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::framer::{self, ReplyBuilder};
use crate::negotiate::{negotiate, InitOutcome, Negotiation, SessionConfig};
use crate::ops::{Errno, Filesystem, RequestContext};

/// Replies queued to the writer before dispatch tasks block.
const REPLY_QUEUE_DEPTH: usize = 64;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Constructed, not yet running.
    Created = 0,
    /// Running, waiting for the handshake to settle.
    Negotiating = 1,
    /// Handshake complete, serving requests.
    Active = 2,
    /// Exit requested, draining.
    Exiting = 3,
    /// Fully shut down.
    Closed = 4,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Negotiating,
            2 => Self::Active,
            3 => Self::Exiting,
            _ => Self::Closed,
        }
    }
}

/// One protocol session over one kernel channel.
pub struct Session {
    channel: Channel,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
    state: AtomicU8,
    exited: AtomicBool,
    negotiation: OnceLock<Arc<Negotiation>>,
}

impl Session {
    /// Creates a session serving `fs` over `channel`.
    pub fn new(channel: Channel, fs: Arc<dyn Filesystem>, config: SessionConfig) -> Self {
        Self {
            channel,
            dispatcher: Arc::new(Dispatcher::new(fs)),
            config,
            state: AtomicU8::new(SessionState::Created as u8),
            exited: AtomicBool::new(false),
            negotiation: OnceLock::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// True once exit has been requested; no new dispatch starts after.
    #[must_use]
    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Requests exit. Idempotent; the first call moves the session to
    /// [`SessionState::Exiting`].
    pub fn exit(&self) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.set_state(SessionState::Exiting);
            tracing::debug!("session exit requested");
        }
    }

    /// The settled terms, once the handshake completed.
    #[must_use]
    pub fn negotiation(&self) -> Option<Arc<Negotiation>> {
        self.negotiation.get().cloned()
    }

    /// Runs the session until unmount, destroy, or a fatal channel error.
    ///
    /// Consumes requests one read at a time; handlers run as independent
    /// tasks and may complete out of order, each reply carrying the unique
    /// ID of the request it answers.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.set_state(SessionState::Negotiating);
        tracing::debug!(fd = self.channel.as_raw_fd(), "session starting");

        let (reply_tx, mut reply_rx) = mpsc::channel::<Bytes>(REPLY_QUEUE_DEPTH);
        let writer = {
            let session = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(message) = reply_rx.recv().await {
                    if let Err(err) = session.channel.send(&message).await {
                        tracing::error!(error = %err, "reply write failed, shutting down");
                        session.exit();
                        break;
                    }
                }
            })
        };

        let mut buf = vec![0u8; self.channel.bufsize()];
        while !self.exited() {
            let len = match self.channel.receive(&mut buf).await {
                Ok(Received::Message(len)) => len,
                Ok(Received::Closed) => {
                    tracing::debug!("kernel closed the channel");
                    self.exit();
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "channel receive failed");
                    self.exit();
                    drop(reply_tx);
                    let _ = writer.await;
                    self.set_state(SessionState::Closed);
                    return Err(err.into());
                }
            };

            let request = match framer::parse_request(&buf[..len]) {
                Ok(request) => request,
                Err(err) => {
                    // Broken framing cannot be attributed to a request, so
                    // there is nothing to answer.
                    tracing::warn!(error = %err, "dropping unframeable message");
                    continue;
                }
            };
            let header = request.header;

            let opcode = match request.opcode() {
                Ok(opcode) => opcode,
                Err(err) => {
                    tracing::warn!(unique = header.unique, error = %err, "unsupported opcode");
                    let mut reply = ReplyBuilder::new();
                    reply.write_error(header.unique, Errno::ENOSYS);
                    let _ = reply_tx.send(reply.finish()).await;
                    continue;
                }
            };

            match self.state() {
                SessionState::Negotiating => {
                    self.handle_handshake(&header, opcode, request.payload, &reply_tx)
                        .await;
                    // The handshake may have raised the write limit.
                    if let Some(negotiation) = self.negotiation() {
                        if negotiation.buffer_size() > buf.len() {
                            buf.resize(negotiation.buffer_size(), 0);
                        }
                    }
                    continue;
                }
                SessionState::Active => {}
                _ => break,
            }

            let negotiation = match self.negotiation() {
                Some(negotiation) => negotiation,
                None => {
                    // Active implies a stored negotiation.
                    tracing::error!("active session without negotiated terms");
                    self.exit();
                    break;
                }
            };

            if opcode == FuseOpcode::Destroy {
                // Handled inline: nothing may start after the unmount
                // acknowledgement.
                let reply = self
                    .dispatcher
                    .dispatch(
                        &header,
                        opcode,
                        request.payload,
                        &negotiation,
                        CancellationToken::new(),
                    )
                    .await;
                if let Some(message) = reply {
                    let _ = reply_tx.send(message).await;
                }
                self.exit();
                continue;
            }

            // Register before spawning so an immediately following
            // interrupt finds its target.
            let token = self.dispatcher.register(header.unique).await;
            let message = buf[..len].to_vec();
            let dispatcher = Arc::clone(&self.dispatcher);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let payload = &message[FuseInHeader::SIZE..];
                let reply = dispatcher
                    .dispatch(&header, opcode, payload, &negotiation, token)
                    .await;
                dispatcher.complete(header.unique).await;
                if let Some(message) = reply {
                    let _ = reply_tx.send(message).await;
                }
            });
        }

        drop(reply_tx);
        let _ = writer.await;
        self.set_state(SessionState::Closed);
        tracing::debug!("session closed");
        Ok(())
    }

    /// Handles one message while the session is still negotiating.
    async fn handle_handshake(
        &self,
        header: &FuseInHeader,
        opcode: FuseOpcode,
        payload: &[u8],
        reply_tx: &mpsc::Sender<Bytes>,
    ) {
        let mut reply = ReplyBuilder::new();

        if opcode != FuseOpcode::Init {
            tracing::warn!(opcode = ?opcode, unique = header.unique, "request before handshake");
            if !opcode.is_forget_class() {
                reply.write_error(header.unique, Errno::EIO);
                let _ = reply_tx.send(reply.finish()).await;
            }
            return;
        }

        let arg = match decode::<FuseInitIn>(payload) {
            Some(arg) => arg,
            None => {
                tracing::warn!(unique = header.unique, "truncated handshake request");
                reply.write_error(header.unique, Errno::EINVAL);
                let _ = reply_tx.send(reply.finish()).await;
                return;
            }
        };
        tracing::debug!(
            major = arg.major,
            minor = arg.minor,
            flags = format_args!("{:#x}", arg.flags),
            "handshake request"
        );

        match negotiate(&arg, &self.config) {
            InitOutcome::Unsupported { major } => {
                tracing::error!(major, "kernel protocol too old");
                reply.write_error(header.unique, Errno::EPROTO);
                let _ = reply_tx.send(reply.finish()).await;
                self.exit();
            }
            InitOutcome::MajorOnly { reply: out, reply_size } => {
                tracing::debug!(
                    kernel_major = arg.major,
                    "newer kernel major, answering version only"
                );
                reply.write_record_capped(header.unique, &out, reply_size);
                let _ = reply_tx.send(reply.finish()).await;
                // Still negotiating; the kernel retries in our dialect.
            }
            InitOutcome::Agreed {
                negotiation,
                reply: out,
                reply_size,
            } => {
                let negotiation = Arc::new(negotiation);
                let ctx = RequestContext::new(header, CancellationToken::new());
                if let Err(errno) = self
                    .dispatcher
                    .filesystem()
                    .init(&ctx, &negotiation)
                    .await
                {
                    tracing::error!(errno = errno.raw(), "filesystem rejected the session");
                    reply.write_error(header.unique, errno);
                    let _ = reply_tx.send(reply.finish()).await;
                    self.exit();
                    return;
                }

                let _ = self.negotiation.set(Arc::clone(&negotiation));
                self.set_state(SessionState::Active);
                tracing::debug!(
                    minor = negotiation.minor,
                    flags = format_args!("{:#x}", negotiation.flags),
                    max_write = negotiation.max_write,
                    "handshake complete"
                );
                reply.write_record_capped(header.unique, &out, reply_size);
                let _ = reply_tx.send(reply.finish()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            SessionState::Created,
            SessionState::Negotiating,
            SessionState::Active,
            SessionState::Exiting,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_exit_is_idempotent() {
        struct NullFs;

        #[async_trait::async_trait]
        impl Filesystem for NullFs {}

        let (fd, _peer) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::SeqPacket,
            None,
            nix::sys::socket::SockFlag::empty(),
        )
        .expect("socketpair");
        let session = Session::new(
            Channel::new(fd, 0),
            Arc::new(NullFs),
            SessionConfig::default(),
        );

        assert_eq!(session.state(), SessionState::Created);
        assert!(!session.exited());
        session.exit();
        assert!(session.exited());
        assert_eq!(session.state(), SessionState::Exiting);
        session.exit();
        assert_eq!(session.state(), SessionState::Exiting);
    }
}
