//! Protocol version and capability negotiation.
//!
//! The first request on a fresh channel must be `FUSE_INIT`. Both sides
//! advertise the highest revision they speak; the effective revision is the
//! lower of the two. A kernel on a newer major first learns our major from
//! an abbreviated reply and then re-sends `FUSE_INIT` in it.

use fusebridge_proto::abi::{
    FUSE_ASYNC_READ, FUSE_ATOMIC_O_TRUNC, FUSE_BIG_WRITES, FUSE_KERNEL_MINOR_VERSION,
    FUSE_KERNEL_VERSION, FUSE_MAX_MAX_PAGES, FUSE_MAX_PAGES, FUSE_PARALLEL_DIROPS,
};
use fusebridge_proto::{FuseInitIn, FuseInitOut, FUSE_BUFFER_HEADER_SIZE};

/// Session tunables an embedder may override before the handshake.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest readahead we grant the kernel, bytes.
    pub max_readahead: u32,
    /// Largest single write payload we accept, bytes.
    pub max_write: u32,
    /// Number of background requests the kernel may queue.
    pub max_background: u16,
    /// Background queue level at which the kernel considers us congested.
    pub congestion_threshold: u16,
    /// Timestamp granularity we support, nanoseconds.
    pub time_gran: u32,
    /// Capability flags we are willing to enable.
    pub capabilities: u32,
}

impl SessionConfig {
    /// Capabilities granted by default.
    pub const DEFAULT_CAPABILITIES: u32 = FUSE_ASYNC_READ
        | FUSE_ATOMIC_O_TRUNC
        | FUSE_BIG_WRITES
        | FUSE_PARALLEL_DIROPS
        | FUSE_MAX_PAGES;
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_readahead: 128 * 1024,
            max_write: 128 * 1024,
            max_background: 16,
            congestion_threshold: 12,
            time_gran: 1,
            capabilities: Self::DEFAULT_CAPABILITIES,
        }
    }
}

/// The settled terms of a session, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct Negotiation {
    /// Effective major version (always 7).
    pub major: u32,
    /// Effective minor version: the lower of the two advertisements.
    pub minor: u32,
    /// Enabled capability flags: the intersection of the advertisements.
    pub flags: u32,
    /// Granted readahead, bytes.
    pub max_readahead: u32,
    /// Largest accepted write payload, bytes.
    pub max_write: u32,
    /// Pages per request backing `max_write`.
    pub max_pages: u16,
}

impl Negotiation {
    /// Receive buffer size the session needs: the largest write payload
    /// plus header slack.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.max_write as usize + FUSE_BUFFER_HEADER_SIZE
    }
}

/// Outcome of examining a `FUSE_INIT` request.
#[derive(Debug)]
pub enum InitOutcome {
    /// Versions are compatible; the session may activate.
    Agreed {
        /// Settled terms.
        negotiation: Negotiation,
        /// Reply record to send.
        reply: FuseInitOut,
        /// How many bytes of the record the peer accepts.
        reply_size: usize,
    },
    /// The kernel speaks a newer major. Answer with our version only and
    /// wait for it to retry the handshake in our dialect.
    MajorOnly {
        /// Abbreviated reply record.
        reply: FuseInitOut,
        /// Bytes of the record to send (version fields only).
        reply_size: usize,
    },
    /// The kernel's major predates anything we can serve.
    Unsupported {
        /// Kernel's major version.
        major: u32,
    },
}

const PAGE_SIZE: u32 = 4096;

/// Derives session terms from the kernel's `FUSE_INIT` advertisement.
#[must_use]
pub fn negotiate(arg: &FuseInitIn, config: &SessionConfig) -> InitOutcome {
    if arg.major < FUSE_KERNEL_VERSION {
        return InitOutcome::Unsupported { major: arg.major };
    }

    if arg.major > FUSE_KERNEL_VERSION {
        // Only the version fields are meaningful to a newer-major kernel.
        return InitOutcome::MajorOnly {
            reply: FuseInitOut::default(),
            reply_size: FuseInitOut::serialized_size(0),
        };
    }

    let minor = arg.minor.min(FUSE_KERNEL_MINOR_VERSION);
    let flags = arg.flags & config.capabilities;
    let max_write = config.max_write.max(PAGE_SIZE);
    let max_pages = max_write
        .div_ceil(PAGE_SIZE)
        .min(u32::from(FUSE_MAX_MAX_PAGES)) as u16;
    let max_readahead = arg.max_readahead.min(config.max_readahead);

    let negotiation = Negotiation {
        major: FUSE_KERNEL_VERSION,
        minor,
        flags,
        max_readahead,
        max_write,
        max_pages,
    };

    let reply = FuseInitOut {
        major: FUSE_KERNEL_VERSION,
        minor: FUSE_KERNEL_MINOR_VERSION,
        max_readahead,
        flags,
        max_background: config.max_background,
        congestion_threshold: config.congestion_threshold,
        max_write,
        time_gran: config.time_gran,
        max_pages: if flags & FUSE_MAX_PAGES != 0 {
            max_pages
        } else {
            0
        },
        ..FuseInitOut::default()
    };
    // The peer only reads as much of the record as its own minor defines.
    let reply_size = FuseInitOut::serialized_size(minor);

    InitOutcome::Agreed {
        negotiation,
        reply,
        reply_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusebridge_proto::abi::{FUSE_COMPAT_22_INIT_OUT_SIZE, FUSE_COMPAT_INIT_OUT_SIZE};

    fn kernel_init(major: u32, minor: u32, flags: u32) -> FuseInitIn {
        FuseInitIn {
            major,
            minor,
            max_readahead: 64 * 1024,
            flags,
        }
    }

    #[test]
    fn test_equal_major_settles_lower_minor() {
        let arg = kernel_init(7, 31, SessionConfig::DEFAULT_CAPABILITIES);
        let outcome = negotiate(&arg, &SessionConfig::default());
        let InitOutcome::Agreed { negotiation, reply, reply_size } = outcome else {
            panic!("expected agreement");
        };
        assert_eq!(negotiation.minor, FUSE_KERNEL_MINOR_VERSION);
        assert_eq!(reply.major, 7);
        assert_eq!(reply_size, std::mem::size_of::<FuseInitOut>());

        let arg = kernel_init(7, 19, 0);
        let InitOutcome::Agreed { negotiation, .. } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected agreement");
        };
        assert_eq!(negotiation.minor, 19);
    }

    #[test]
    fn test_flags_are_intersected() {
        let offered = FUSE_ASYNC_READ | FUSE_BIG_WRITES | (1 << 30);
        let arg = kernel_init(7, 28, offered);
        let InitOutcome::Agreed { negotiation, .. } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected agreement");
        };
        assert_eq!(negotiation.flags, FUSE_ASYNC_READ | FUSE_BIG_WRITES);
    }

    #[test]
    fn test_newer_major_answers_version_only() {
        let arg = kernel_init(8, 1, 0);
        let InitOutcome::MajorOnly { reply, reply_size } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected major-only answer");
        };
        assert_eq!(reply.major, 7);
        assert_eq!(reply_size, FUSE_COMPAT_INIT_OUT_SIZE);
    }

    #[test]
    fn test_older_major_is_unsupported() {
        let arg = kernel_init(6, 99, 0);
        assert!(matches!(
            negotiate(&arg, &SessionConfig::default()),
            InitOutcome::Unsupported { major: 6 }
        ));
    }

    #[test]
    fn test_reply_size_tracks_peer_minor() {
        let arg = kernel_init(7, 4, 0);
        let InitOutcome::Agreed { reply_size, .. } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected agreement");
        };
        assert_eq!(reply_size, FUSE_COMPAT_INIT_OUT_SIZE);

        let arg = kernel_init(7, 13, 0);
        let InitOutcome::Agreed { reply_size, .. } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected agreement");
        };
        assert_eq!(reply_size, FUSE_COMPAT_22_INIT_OUT_SIZE);
    }

    #[test]
    fn test_max_pages_clamped() {
        let config = SessionConfig {
            max_write: 8 * 1024 * 1024,
            ..SessionConfig::default()
        };
        let arg = kernel_init(7, 28, FUSE_MAX_PAGES);
        let InitOutcome::Agreed { negotiation, reply, .. } = negotiate(&arg, &config) else {
            panic!("expected agreement");
        };
        assert_eq!(negotiation.max_pages, FUSE_MAX_MAX_PAGES);
        assert_eq!(reply.max_pages, FUSE_MAX_MAX_PAGES);
    }

    #[test]
    fn test_max_pages_suppressed_without_flag() {
        let arg = kernel_init(7, 28, FUSE_ASYNC_READ);
        let InitOutcome::Agreed { reply, .. } =
            negotiate(&arg, &SessionConfig::default())
        else {
            panic!("expected agreement");
        };
        assert_eq!(reply.max_pages, 0);
    }
}
