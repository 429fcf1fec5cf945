//! Runs a session against a socketpair instead of a real kernel channel,
//! playing both sides of the protocol: handshake, a lookup, a readdir, and
//! the final destroy.
//!
//! Run with logging to watch the exchange:
//!
//! ```sh
//! RUST_LOG=fusebridge_engine=debug cargo run --example loopback-session
//! ```

use std::ffi::OsStr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::socket::{socketpair, AddressFamily, MsgFlags, SockFlag, SockType};

use fusebridge_engine::{
    Channel, Errno, Filesystem, RequestContext, Session, SessionConfig,
};
use fusebridge_proto::{
    bytes_of, decode, DirentBuf, FuseAttr, FuseEntryOut, FuseInHeader, FuseInitIn, FuseInitOut,
    FuseOpcode, FuseOutHeader, FuseReadIn,
};

/// One file, one name, enough to watch the protocol move.
struct HelloFs;

#[async_trait]
impl Filesystem for HelloFs {
    async fn lookup(&self, _ctx: &RequestContext, name: &OsStr) -> Result<FuseEntryOut, Errno> {
        if name == OsStr::new("hello.txt") {
            Ok(FuseEntryOut {
                nodeid: 2,
                generation: 1,
                attr: FuseAttr {
                    ino: 2,
                    size: 13,
                    mode: libc::S_IFREG | 0o444,
                    nlink: 1,
                    ..FuseAttr::default()
                },
                ..FuseEntryOut::default()
            })
        } else {
            Err(Errno::ENOENT)
        }
    }

    async fn readdir(
        &self,
        _ctx: &RequestContext,
        arg: FuseReadIn,
        mut reply: DirentBuf,
    ) -> Result<DirentBuf, Errno> {
        if arg.offset == 0 {
            reply.push(1, 1, u32::from(libc::DT_DIR), OsStr::new("."));
            reply.push(1, 2, u32::from(libc::DT_DIR), OsStr::new(".."));
            reply.push(2, 3, u32::from(libc::DT_REG), OsStr::new("hello.txt"));
        }
        Ok(reply)
    }
}

fn send(fd: &OwnedFd, opcode: FuseOpcode, unique: u64, nodeid: u64, payload: &[u8]) {
    let header = FuseInHeader {
        len: (FuseInHeader::SIZE + payload.len()) as u32,
        opcode: opcode as u32,
        unique,
        nodeid,
        uid: 1000,
        gid: 1000,
        pid: std::process::id(),
        padding: 0,
    };
    let mut message = bytes_of(&header).to_vec();
    message.extend_from_slice(payload);
    nix::unistd::write(fd, &message).expect("kernel-side write");
}

async fn recv(fd: &OwnedFd) -> (FuseOutHeader, Vec<u8>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match nix::sys::socket::recv(fd.as_raw_fd(), &mut buf, MsgFlags::MSG_DONTWAIT) {
            Ok(n) => {
                let header: FuseOutHeader = decode(&buf[..n]).expect("reply header");
                return (header, buf[FuseOutHeader::SIZE..n].to_vec());
            }
            Err(nix::errno::Errno::EAGAIN) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(err) => panic!("kernel-side read failed: {err}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (engine_fd, kernel_fd) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )?;

    let session = Arc::new(Session::new(
        Channel::new(engine_fd, 0),
        Arc::new(HelloFs),
        SessionConfig::default(),
    ));
    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    // Handshake.
    let init = FuseInitIn {
        major: 7,
        minor: 31,
        max_readahead: 64 * 1024,
        flags: SessionConfig::DEFAULT_CAPABILITIES,
    };
    send(&kernel_fd, FuseOpcode::Init, 2, 0, bytes_of(&init));
    let (_, payload) = recv(&kernel_fd).await;
    let out: FuseInitOut = decode(&payload).expect("init out");
    println!(
        "negotiated {}.{}, max_write {} bytes",
        out.major,
        session.negotiation().map_or(0, |n| n.minor),
        out.max_write
    );

    // Lookup.
    send(&kernel_fd, FuseOpcode::Lookup, 4, 1, b"hello.txt\0");
    let (header, payload) = recv(&kernel_fd).await;
    let entry: FuseEntryOut = decode(&payload).expect("entry out");
    println!(
        "lookup(hello.txt): error {}, nodeid {}",
        header.error, entry.nodeid
    );

    // Readdir.
    let read = FuseReadIn {
        fh: 0,
        offset: 0,
        size: 4096,
        ..FuseReadIn::default()
    };
    send(&kernel_fd, FuseOpcode::Readdir, 6, 1, bytes_of(&read));
    let (_, payload) = recv(&kernel_fd).await;
    for (dirent, name) in fusebridge_proto::DirentIter::new(&payload) {
        println!(
            "  dirent ino {} off {} {}",
            dirent.ino,
            dirent.off,
            String::from_utf8_lossy(name)
        );
    }

    // Unmount.
    send(&kernel_fd, FuseOpcode::Destroy, 8, 0, b"");
    let (header, _) = recv(&kernel_fd).await;
    println!("destroy acknowledged, error {}", header.error);

    runner.await??;
    Ok(())
}
