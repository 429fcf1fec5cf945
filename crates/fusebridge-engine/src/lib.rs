//! # fusebridge-engine
//!
//! Userspace engine for the FUSE kernel protocol: message framing, opcode
//! dispatch, and session lifecycle over a kernel channel descriptor.
//!
//! ```text
//!  /dev/fuse fd                fusebridge-engine
//! +------------+  requests   +------------+  typed ops  +------------+
//! |   kernel   | ----------> |  Session   | ----------> | Filesystem |
//! |   driver   | <---------- | Dispatcher | <---------- |  (yours)   |
//! +------------+  replies    +------------+   results   +------------+
//! ```
//!
//! A [`Session`] reads one request per channel read, validates its framing,
//! and fans requests out to concurrent handler tasks; replies are written
//! back atomically, correlated by the request's unique ID rather than by
//! order. The first exchange is the `FUSE_INIT` handshake, which settles
//! the protocol minor, capability flags, and transfer limits every later
//! reply is encoded against.
//!
//! Mounting is out of scope: the embedder hands the engine an already-open
//! channel descriptor. The [`privs`] module covers the other side of that
//! split, keeping a setuid helper unprivileged outside explicit guard
//! windows.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod negotiate;
pub mod ops;
pub mod privs;
pub mod session;

pub use channel::{Channel, Received};
pub use dispatch::{Dispatcher, Operation};
pub use error::{ChannelError, EngineError, PrivilegeError, ProtocolError, Result};
pub use framer::{parse_request, ReplyBuilder, Request};
pub use negotiate::{negotiate, InitOutcome, Negotiation, SessionConfig};
pub use ops::{CreateReply, Errno, Filesystem, IoctlReply, RequestContext, XattrReply};
pub use privs::{drop_privs, restore_privs, PrivilegeGuard};
pub use session::{Session, SessionState};
