//! Operation interface between the dispatcher and a filesystem
//! implementation.
//!
//! The engine decodes each request into a typed call on [`Filesystem`]; the
//! implementation answers with a reply record or an [`Errno`]. Every method
//! has a default body answering `ENOSYS`, so an implementation only provides
//! the operations it supports.

use std::ffi::OsStr;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fusebridge_proto::{
    DirentBuf, FuseAccessIn, FuseAttrOut, FuseBmapIn, FuseBmapOut, FuseCopyFileRangeIn,
    FuseCreateIn, FuseEntryOut, FuseFallocateIn, FuseFlushIn, FuseForgetOne, FuseFsyncIn,
    FuseGetattrIn, FuseGetxattrIn, FuseInHeader, FuseIoctlIn, FuseKstatfs, FuseLkIn, FuseLkOut,
    FuseLseekIn, FuseLseekOut, FuseMkdirIn, FuseMknodIn, FuseOpenIn, FuseOpenOut, FusePollIn,
    FusePollOut, FuseReadIn, FuseReleaseIn, FuseSetattrIn, FuseSetxattrIn, FuseWriteIn,
    FuseWriteOut,
};

use crate::negotiate::Negotiation;

/// A POSIX errno carried in an error reply.
///
/// Stored positive; the reply header negates it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Self = Self(libc::EPERM);
    pub const ENOENT: Self = Self(libc::ENOENT);
    pub const EINTR: Self = Self(libc::EINTR);
    pub const EIO: Self = Self(libc::EIO);
    pub const EAGAIN: Self = Self(libc::EAGAIN);
    pub const EACCES: Self = Self(libc::EACCES);
    pub const EEXIST: Self = Self(libc::EEXIST);
    pub const ENOTDIR: Self = Self(libc::ENOTDIR);
    pub const EISDIR: Self = Self(libc::EISDIR);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const ERANGE: Self = Self(libc::ERANGE);
    pub const ENOSYS: Self = Self(libc::ENOSYS);
    pub const ENOTEMPTY: Self = Self(libc::ENOTEMPTY);
    pub const ENODATA: Self = Self(libc::ENODATA);
    pub const EBADF: Self = Self(libc::EBADF);
    pub const EPROTO: Self = Self(libc::EPROTO);

    /// Wraps a raw errno value. Negative values are normalized to positive.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw.abs())
    }

    /// The positive errno value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        err.raw_os_error().map_or(Self::EIO, Self::new)
    }
}

/// Per-request call context.
///
/// Carries the identity fields from the request header and the
/// cancellation token wired to `FUSE_INTERRUPT`; long-running handlers
/// should watch [`interrupted`](Self::interrupted) or
/// [`cancelled`](Self::cancelled) and bail out with `EINTR`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID, echoed in the reply.
    pub unique: u64,
    /// Node ID the operation targets.
    pub nodeid: u64,
    /// UID of the calling process.
    pub uid: u32,
    /// GID of the calling process.
    pub gid: u32,
    /// PID of the calling process.
    pub pid: u32,
    interrupt: CancellationToken,
}

impl RequestContext {
    pub(crate) fn new(header: &FuseInHeader, interrupt: CancellationToken) -> Self {
        Self {
            unique: header.unique,
            nodeid: header.nodeid,
            uid: header.uid,
            gid: header.gid,
            pid: header.pid,
            interrupt,
        }
    }

    /// Returns true once the kernel has interrupted this request.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Resolves when the kernel interrupts this request.
    pub async fn cancelled(&self) {
        self.interrupt.cancelled().await;
    }
}

/// Reply to a getxattr or listxattr request.
#[derive(Debug, Clone)]
pub enum XattrReply {
    /// Size probe answer: how many bytes the value would occupy.
    Size(u32),
    /// The value (or NUL-separated name list) itself.
    Data(Vec<u8>),
}

/// Reply to a create request: the new entry plus its open handle.
#[derive(Debug, Clone, Copy)]
pub struct CreateReply {
    /// Entry for the created file.
    pub entry: FuseEntryOut,
    /// Open state for the returned handle.
    pub open: FuseOpenOut,
}

/// Reply to an ioctl request.
#[derive(Debug, Clone, Default)]
pub struct IoctlReply {
    /// Ioctl result value.
    pub result: i32,
    /// Output buffer, at most `out_size` bytes.
    pub data: Vec<u8>,
}

/// The operations a filesystem serves.
///
/// Forget-class methods return nothing: the kernel never reads a reply for
/// them, so there is no error to report either.
#[async_trait]
#[allow(unused_variables)]
pub trait Filesystem: Send + Sync {
    /// Called once when the handshake completes, before any other
    /// operation. An error aborts the session.
    async fn init(
        &self,
        ctx: &RequestContext,
        negotiation: &Negotiation,
    ) -> Result<(), Errno> {
        Ok(())
    }

    /// Called when the kernel unmounts. No reply semantics beyond
    /// acknowledgement; the session exits afterwards.
    async fn destroy(&self, ctx: &RequestContext) {}

    /// Looks up a directory entry by name.
    async fn lookup(&self, ctx: &RequestContext, name: &OsStr) -> Result<FuseEntryOut, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Forgets `nlookup` references to the node. Never answered.
    async fn forget(&self, ctx: &RequestContext, nlookup: u64) {}

    /// Batched forget. Never answered.
    async fn batch_forget(&self, ctx: &RequestContext, nodes: &[FuseForgetOne]) {}

    async fn getattr(
        &self,
        ctx: &RequestContext,
        arg: FuseGetattrIn,
    ) -> Result<FuseAttrOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn setattr(
        &self,
        ctx: &RequestContext,
        arg: FuseSetattrIn,
    ) -> Result<FuseAttrOut, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Reads the target of a symbolic link.
    async fn readlink(&self, ctx: &RequestContext) -> Result<Vec<u8>, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn symlink(
        &self,
        ctx: &RequestContext,
        name: &OsStr,
        target: &OsStr,
    ) -> Result<FuseEntryOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn mknod(
        &self,
        ctx: &RequestContext,
        arg: FuseMknodIn,
        name: &OsStr,
    ) -> Result<FuseEntryOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn mkdir(
        &self,
        ctx: &RequestContext,
        arg: FuseMkdirIn,
        name: &OsStr,
    ) -> Result<FuseEntryOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn unlink(&self, ctx: &RequestContext, name: &OsStr) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn rmdir(&self, ctx: &RequestContext, name: &OsStr) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    /// Renames `name` under the context node to `newname` under `newdir`.
    /// `flags` carries `RENAME_NOREPLACE` / `RENAME_EXCHANGE` when the
    /// kernel sent a rename2; plain renames pass 0.
    async fn rename(
        &self,
        ctx: &RequestContext,
        newdir: u64,
        name: &OsStr,
        newname: &OsStr,
        flags: u32,
    ) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn link(
        &self,
        ctx: &RequestContext,
        oldnodeid: u64,
        newname: &OsStr,
    ) -> Result<FuseEntryOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn open(&self, ctx: &RequestContext, arg: FuseOpenIn) -> Result<FuseOpenOut, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Reads up to `arg.size` bytes; the dispatcher truncates any excess.
    async fn read(&self, ctx: &RequestContext, arg: FuseReadIn) -> Result<Vec<u8>, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        arg: FuseWriteIn,
        data: &[u8],
    ) -> Result<FuseWriteOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn statfs(&self, ctx: &RequestContext) -> Result<FuseKstatfs, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn release(&self, ctx: &RequestContext, arg: FuseReleaseIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn fsync(&self, ctx: &RequestContext, arg: FuseFsyncIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn setxattr(
        &self,
        ctx: &RequestContext,
        arg: FuseSetxattrIn,
        name: &OsStr,
        value: &[u8],
    ) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    /// `arg.size == 0` is a size probe and should answer
    /// [`XattrReply::Size`]; otherwise answer at most `arg.size` bytes of
    /// data or `ERANGE`.
    async fn getxattr(
        &self,
        ctx: &RequestContext,
        arg: FuseGetxattrIn,
        name: &OsStr,
    ) -> Result<XattrReply, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn listxattr(
        &self,
        ctx: &RequestContext,
        arg: FuseGetxattrIn,
    ) -> Result<XattrReply, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn removexattr(&self, ctx: &RequestContext, name: &OsStr) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn flush(&self, ctx: &RequestContext, arg: FuseFlushIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn opendir(&self, ctx: &RequestContext, arg: FuseOpenIn) -> Result<FuseOpenOut, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Fills `reply` with entries starting at the cursor in `arg.offset`.
    /// A full buffer is not an error; the kernel resumes from the last
    /// entry's `off`.
    async fn readdir(
        &self,
        ctx: &RequestContext,
        arg: FuseReadIn,
        reply: DirentBuf,
    ) -> Result<DirentBuf, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Readdir combined with lookup for each entry.
    async fn readdirplus(
        &self,
        ctx: &RequestContext,
        arg: FuseReadIn,
        reply: DirentBuf,
    ) -> Result<DirentBuf, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn releasedir(&self, ctx: &RequestContext, arg: FuseReleaseIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn fsyncdir(&self, ctx: &RequestContext, arg: FuseFsyncIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    /// Tests for a POSIX lock.
    async fn getlk(&self, ctx: &RequestContext, arg: FuseLkIn) -> Result<FuseLkOut, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Acquires or releases a POSIX lock. `sleep` distinguishes a blocking
    /// `SETLKW` from a non-blocking `SETLK`; blocking handlers must honor
    /// interruption.
    async fn setlk(
        &self,
        ctx: &RequestContext,
        arg: FuseLkIn,
        sleep: bool,
    ) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn access(&self, ctx: &RequestContext, arg: FuseAccessIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        arg: FuseCreateIn,
        name: &OsStr,
    ) -> Result<CreateReply, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn bmap(&self, ctx: &RequestContext, arg: FuseBmapIn) -> Result<FuseBmapOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn ioctl(
        &self,
        ctx: &RequestContext,
        arg: FuseIoctlIn,
        data: &[u8],
    ) -> Result<IoctlReply, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn poll(&self, ctx: &RequestContext, arg: FusePollIn) -> Result<FusePollOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn fallocate(&self, ctx: &RequestContext, arg: FuseFallocateIn) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    async fn lseek(&self, ctx: &RequestContext, arg: FuseLseekIn) -> Result<FuseLseekOut, Errno> {
        Err(Errno::ENOSYS)
    }

    async fn copy_file_range(
        &self,
        ctx: &RequestContext,
        arg: FuseCopyFileRangeIn,
    ) -> Result<FuseWriteOut, Errno> {
        Err(Errno::ENOSYS)
    }
}
