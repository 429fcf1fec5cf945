//! Kernel request channel.
//!
//! Wraps the character device file descriptor the kernel driver speaks
//! through. Reads are message-oriented: each successful read returns exactly
//! one request, and each reply must be written in a single call so the
//! header and payload arrive atomically.

use std::os::fd::{AsRawFd, OwnedFd};

use fusebridge_proto::{FUSE_BUFFER_HEADER_SIZE, FUSE_MIN_READ_BUFFER};

use crate::error::ChannelError;

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// One complete request of this many bytes.
    Message(usize),
    /// The peer is gone (unmount or device close); no more requests will
    /// arrive.
    Closed,
}

/// Message channel to the kernel driver.
///
/// The descriptor is owned; dropping the channel closes it.
#[derive(Debug)]
pub struct Channel {
    fd: OwnedFd,
    bufsize: usize,
}

impl Channel {
    /// Wraps an open kernel channel descriptor.
    ///
    /// `bufsize` is the receive buffer size the session should use; it is
    /// raised to the protocol minimum if too small, so the channel can
    /// always accept a request before the handshake settles the real limit.
    #[must_use]
    pub fn new(fd: OwnedFd, bufsize: usize) -> Self {
        Self {
            fd,
            bufsize: bufsize.max(FUSE_MIN_READ_BUFFER + FUSE_BUFFER_HEADER_SIZE),
        }
    }

    /// Receive buffer size this channel requires.
    #[must_use]
    pub const fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Raw descriptor, for diagnostics.
    #[must_use]
    pub fn as_raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    /// Sets the descriptor to non-blocking mode.
    fn set_nonblocking(&self) -> Result<(), ChannelError> {
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(ChannelError::Fatal(std::io::Error::last_os_error()));
        }
        let result =
            unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(ChannelError::Fatal(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Receives one request into `buf`.
    ///
    /// Retries transparently on `EINTR` and on `ENOENT` (the kernel reaped
    /// an interrupted request between queueing and our read). `ENODEV` and
    /// end-of-file both mean the filesystem was unmounted and report
    /// [`Received::Closed`].
    pub async fn receive(&self, buf: &mut [u8]) -> Result<Received, ChannelError> {
        self.set_nonblocking()?;

        loop {
            let result = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };

            if result == 0 {
                return Ok(Received::Closed);
            }
            if result > 0 {
                return Ok(Received::Message(result as usize));
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR | libc::ENOENT) => continue,
                Some(libc::EAGAIN) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Some(libc::ENODEV) => return Ok(Received::Closed),
                _ => return Err(ChannelError::Fatal(err)),
            }
        }
    }

    /// Sends one complete reply.
    ///
    /// `ENOENT` means the request was interrupted and reaped before the
    /// reply landed; the reply is silently dropped. A short write would
    /// corrupt the message stream and is fatal.
    pub async fn send(&self, msg: &[u8]) -> Result<(), ChannelError> {
        self.set_nonblocking()?;

        loop {
            let result = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    msg.as_ptr().cast::<libc::c_void>(),
                    msg.len(),
                )
            };

            if result >= 0 {
                if result as usize != msg.len() {
                    return Err(ChannelError::Fatal(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "short reply write",
                    )));
                }
                return Ok(());
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Some(libc::ENOENT) => {
                    tracing::debug!("reply raced an interrupt, dropped");
                    return Ok(());
                }
                _ => return Err(ChannelError::Fatal(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    fn test_pair() -> (Channel, OwnedFd) {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .expect("socketpair");
        (Channel::new(a, 0), b)
    }

    #[test]
    fn test_bufsize_floor() {
        let (channel, _peer) = test_pair();
        assert_eq!(
            channel.bufsize(),
            FUSE_MIN_READ_BUFFER + FUSE_BUFFER_HEADER_SIZE
        );

        let (a, _b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .expect("socketpair");
        let big = Channel::new(a, 1 << 20);
        assert_eq!(big.bufsize(), 1 << 20);
    }

    #[tokio::test]
    async fn test_receive_one_message() {
        let (channel, peer) = test_pair();
        nix::unistd::write(&peer, b"hello").expect("peer write");

        let mut buf = vec![0u8; 64];
        let got = channel.receive(&mut buf).await.expect("receive");
        assert_eq!(got, Received::Message(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[tokio::test]
    async fn test_receive_reports_closed_on_eof() {
        let (channel, peer) = test_pair();
        drop(peer);

        let mut buf = vec![0u8; 64];
        let got = channel.receive(&mut buf).await.expect("receive");
        assert_eq!(got, Received::Closed);
    }

    #[tokio::test]
    async fn test_send_is_atomic() {
        let (channel, peer) = test_pair();
        channel.send(b"reply-bytes").await.expect("send");

        let mut buf = [0u8; 64];
        let n = nix::unistd::read(peer.as_raw_fd(), &mut buf).expect("peer read");
        assert_eq!(&buf[..n], b"reply-bytes");
    }
}
