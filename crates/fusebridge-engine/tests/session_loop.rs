//! End-to-end session tests over a socketpair standing in for the kernel
//! channel. The test side plays the kernel: it writes framed requests and
//! reads framed replies, one datagram per message.

use std::ffi::OsStr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::socket::{socketpair, AddressFamily, MsgFlags, SockFlag, SockType};

use fusebridge_engine::{
    Channel, Errno, Filesystem, RequestContext, Session, SessionConfig, SessionState,
};
use fusebridge_proto::{
    bytes_of, decode, FuseAttr, FuseEntryOut, FuseInHeader, FuseInitIn, FuseInitOut,
    FuseOpcode, FuseOutHeader,
};

struct RecordingFs {
    forgets: AtomicU64,
    destroyed: AtomicBool,
}

impl RecordingFs {
    fn new() -> Self {
        Self {
            forgets: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Filesystem for RecordingFs {
    async fn lookup(&self, ctx: &RequestContext, name: &OsStr) -> Result<FuseEntryOut, Errno> {
        assert_eq!(ctx.nodeid, 1);
        if name == OsStr::new("hello") {
            Ok(FuseEntryOut {
                nodeid: 2,
                generation: 1,
                attr: FuseAttr {
                    ino: 2,
                    mode: libc::S_IFREG | 0o644,
                    ..FuseAttr::default()
                },
                ..FuseEntryOut::default()
            })
        } else {
            Err(Errno::ENOENT)
        }
    }

    async fn forget(&self, _ctx: &RequestContext, nlookup: u64) {
        self.forgets.fetch_add(nlookup, Ordering::SeqCst);
    }

    async fn destroy(&self, _ctx: &RequestContext) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

struct FakeKernel {
    fd: OwnedFd,
    next_unique: u64,
}

impl FakeKernel {
    fn send(&mut self, opcode: FuseOpcode, nodeid: u64, payload: &[u8]) -> u64 {
        self.next_unique += 2;
        let unique = self.next_unique;
        self.send_raw(opcode as u32, unique, nodeid, payload);
        unique
    }

    fn send_raw(&mut self, opcode: u32, unique: u64, nodeid: u64, payload: &[u8]) {
        let header = FuseInHeader {
            len: (FuseInHeader::SIZE + payload.len()) as u32,
            opcode,
            unique,
            nodeid,
            uid: 1000,
            gid: 1000,
            pid: 4242,
            padding: 0,
        };
        let mut message = bytes_of(&header).to_vec();
        message.extend_from_slice(payload);
        nix::unistd::write(&self.fd, &message).expect("kernel-side write");
    }

    /// Reads one reply, polling briefly since the session runs in another
    /// task.
    async fn recv(&mut self) -> (FuseOutHeader, Vec<u8>) {
        let mut buf = vec![0u8; 64 * 1024];
        for _ in 0..200 {
            match nix::sys::socket::recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(n) => {
                    let header: FuseOutHeader = decode(&buf[..n]).expect("reply header");
                    assert_eq!(header.len as usize, n, "reply length field covers message");
                    return (header, buf[FuseOutHeader::SIZE..n].to_vec());
                }
                Err(nix::errno::Errno::EAGAIN) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => panic!("kernel-side read failed: {err}"),
            }
        }
        panic!("no reply within two seconds");
    }

    async fn handshake(&mut self, major: u32, minor: u32) -> (FuseOutHeader, Vec<u8>) {
        let arg = FuseInitIn {
            major,
            minor,
            max_readahead: 64 * 1024,
            flags: SessionConfig::DEFAULT_CAPABILITIES,
        };
        self.send(FuseOpcode::Init, 0, bytes_of(&arg));
        self.recv().await
    }
}

fn start_session(fs: Arc<RecordingFs>) -> (FakeKernel, Arc<Session>, tokio::task::JoinHandle<()>) {
    let (engine_fd, kernel_fd) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .expect("socketpair");

    let session = Arc::new(Session::new(
        Channel::new(engine_fd, 0),
        fs,
        SessionConfig::default(),
    ));
    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session.run().await.expect("session run");
        })
    };
    (
        FakeKernel {
            fd: kernel_fd,
            next_unique: 0,
        },
        session,
        runner,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_settles_lower_minor() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(Arc::clone(&fs));

    let (header, payload) = kernel.handshake(7, 31).await;
    assert_eq!(header.error, 0);
    let out: FuseInitOut = decode(&payload).expect("init out");
    assert_eq!(out.major, 7);
    assert_eq!(out.minor, 28);
    assert_eq!(out.max_write, 128 * 1024);

    let negotiation = session.negotiation().expect("negotiated");
    assert_eq!(negotiation.minor, 28);
    assert_eq!(session.state(), SessionState::Active);

    session.exit();
    drop(kernel);
    runner.await.expect("runner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_newer_major_retries_handshake() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(Arc::clone(&fs));

    // A kernel on major 8 first learns our version from an abbreviated
    // reply, then re-sends INIT in our dialect.
    let (header, payload) = kernel.handshake(8, 3).await;
    assert_eq!(header.error, 0);
    assert_eq!(payload.len(), 8, "version-only reply");
    let major = u32::from_ne_bytes(payload[0..4].try_into().expect("major"));
    assert_eq!(major, 7);
    assert_eq!(session.state(), SessionState::Negotiating);
    assert!(session.negotiation().is_none());

    let (header, _) = kernel.handshake(7, 28).await;
    assert_eq!(header.error, 0);
    assert_eq!(session.state(), SessionState::Active);

    session.exit();
    drop(kernel);
    runner.await.expect("runner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_before_handshake_is_rejected() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(Arc::clone(&fs));

    let unique = kernel.send(FuseOpcode::Lookup, 1, b"hello\0");
    let (header, _) = kernel.recv().await;
    assert_eq!(header.unique, unique);
    assert_eq!(header.error, -libc::EIO);
    assert_eq!(session.state(), SessionState::Negotiating);

    // The handshake still works afterwards.
    let (header, _) = kernel.handshake(7, 28).await;
    assert_eq!(header.error, 0);
    assert_eq!(session.state(), SessionState::Active);

    session.exit();
    drop(kernel);
    runner.await.expect("runner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ancient_major_ends_the_session() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(fs);

    let (header, _) = kernel.handshake(6, 8).await;
    assert_eq!(header.error, -libc::EPROTO);

    runner.await.expect("runner");
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lookup_and_unknown_opcode() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(fs);
    kernel.handshake(7, 28).await;

    let unique = kernel.send(FuseOpcode::Lookup, 1, b"hello\0");
    let (header, payload) = kernel.recv().await;
    assert_eq!(header.unique, unique);
    assert_eq!(header.error, 0);
    let entry: FuseEntryOut = decode(&payload).expect("entry");
    assert_eq!(entry.nodeid, 2);

    let unique = kernel.send(FuseOpcode::Lookup, 1, b"missing\0");
    let (header, _) = kernel.recv().await;
    assert_eq!(header.unique, unique);
    assert_eq!(header.error, -libc::ENOENT);

    kernel.send_raw(9999, 777, 1, b"");
    let (header, _) = kernel.recv().await;
    assert_eq!(header.unique, 777);
    assert_eq!(header.error, -libc::ENOSYS);

    session.exit();
    drop(kernel);
    runner.await.expect("runner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forget_gets_no_reply() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(Arc::clone(&fs));
    kernel.handshake(7, 28).await;

    let forget = fusebridge_proto::FuseForgetIn { nlookup: 3 };
    kernel.send(FuseOpcode::Forget, 2, bytes_of(&forget));

    // The next reply on the wire belongs to the lookup, not the forget.
    let unique = kernel.send(FuseOpcode::Lookup, 1, b"hello\0");
    let (header, _) = kernel.recv().await;
    assert_eq!(header.unique, unique);
    assert_eq!(fs.forgets.load(Ordering::SeqCst), 3);

    session.exit();
    drop(kernel);
    runner.await.expect("runner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroy_acknowledges_and_exits() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(Arc::clone(&fs));
    kernel.handshake(7, 28).await;

    let unique = kernel.send(FuseOpcode::Destroy, 0, b"");
    let (header, payload) = kernel.recv().await;
    assert_eq!(header.unique, unique);
    assert_eq!(header.error, 0);
    assert!(payload.is_empty());

    runner.await.expect("runner");
    assert!(fs.destroyed.load(Ordering::SeqCst));
    assert!(session.exited());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unmount_closes_the_session() {
    let fs = Arc::new(RecordingFs::new());
    let (mut kernel, session, runner) = start_session(fs);
    kernel.handshake(7, 28).await;

    drop(kernel);
    runner.await.expect("runner");
    assert!(session.exited());
    assert_eq!(session.state(), SessionState::Closed);
}
