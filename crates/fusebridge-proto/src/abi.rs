//! Fixed-layout protocol records.
//!
//! Field order, widths, and reserved padding follow the kernel header
//! exactly. Padding and `unused` fields must be zeroed on write and are
//! ignored on read.

// Allow casts for FUSE protocol binary compatibility
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation
)]

use std::mem::size_of;

use crate::codec::WireRecord;

// ============================================================================
// Constants
// ============================================================================

/// FUSE kernel protocol major version.
pub const FUSE_KERNEL_VERSION: u32 = 7;

/// FUSE kernel protocol minor version supported by this engine.
pub const FUSE_KERNEL_MINOR_VERSION: u32 = 28;

/// The node ID of the root inode.
pub const FUSE_ROOT_ID: u64 = 1;

/// The receive buffer is required to be at least this large.
pub const FUSE_MIN_READ_BUFFER: usize = 8192;

/// Room needed in the receive buffer to accommodate a request header.
pub const FUSE_BUFFER_HEADER_SIZE: usize = 0x1000;

/// Hard upper bound on the per-request page count the engine will negotiate.
pub const FUSE_MAX_MAX_PAGES: u16 = 256;

/// Default per-request page count before configuration says otherwise.
pub const FUSE_DEFAULT_MAX_PAGES_PER_REQ: u16 = 32;

// INIT request/reply flags
pub const FUSE_ASYNC_READ: u32 = 1 << 0;
pub const FUSE_POSIX_LOCKS: u32 = 1 << 1;
pub const FUSE_ATOMIC_O_TRUNC: u32 = 1 << 3;
pub const FUSE_BIG_WRITES: u32 = 1 << 5;
pub const FUSE_DONT_MASK: u32 = 1 << 6;
pub const FUSE_HAS_IOCTL_DIR: u32 = 1 << 11;
pub const FUSE_AUTO_INVAL_DATA: u32 = 1 << 12;
pub const FUSE_ASYNC_DIO: u32 = 1 << 15;
pub const FUSE_PARALLEL_DIROPS: u32 = 1 << 18;
pub const FUSE_HANDLE_KILLPRIV: u32 = 1 << 19;
pub const FUSE_POSIX_ACL: u32 = 1 << 20;
pub const FUSE_MAX_PAGES: u32 = 1 << 22;

// Setattr valid flags
pub const FATTR_MODE: u32 = 1 << 0;
pub const FATTR_UID: u32 = 1 << 1;
pub const FATTR_GID: u32 = 1 << 2;
pub const FATTR_SIZE: u32 = 1 << 3;
pub const FATTR_ATIME: u32 = 1 << 4;
pub const FATTR_MTIME: u32 = 1 << 5;
pub const FATTR_FH: u32 = 1 << 6;
pub const FATTR_ATIME_NOW: u32 = 1 << 7;
pub const FATTR_MTIME_NOW: u32 = 1 << 8;
pub const FATTR_LOCKOWNER: u32 = 1 << 9;
pub const FATTR_CTIME: u32 = 1 << 10;

// Flags returned by the OPEN request
pub const FOPEN_DIRECT_IO: u32 = 1 << 0;
pub const FOPEN_KEEP_CACHE: u32 = 1 << 1;
pub const FOPEN_NONSEEKABLE: u32 = 1 << 2;
pub const FOPEN_CACHE_DIR: u32 = 1 << 3;
pub const FOPEN_STREAM: u32 = 1 << 4;

// Release flags
pub const FUSE_RELEASE_FLUSH: u32 = 1 << 0;

// Compat sizes: byte lengths of the older, truncated record layouts that
// peers below the gating minor version still produce and accept.
pub const FUSE_COMPAT_INIT_OUT_SIZE: usize = 8;
pub const FUSE_COMPAT_22_INIT_OUT_SIZE: usize = 24;
pub const FUSE_COMPAT_ENTRY_OUT_SIZE: usize = 120;
pub const FUSE_COMPAT_ATTR_OUT_SIZE: usize = 96;
pub const FUSE_COMPAT_MKNOD_IN_SIZE: usize = 8;
pub const FUSE_COMPAT_WRITE_IN_SIZE: usize = 24;
pub const FUSE_COMPAT_STATFS_SIZE: usize = 48;

// ============================================================================
// Opcodes
// ============================================================================

/// FUSE operation codes.
///
/// The numeric values are defined by the kernel interface and must never be
/// renumbered. Values 7 and 19 are intentionally unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FuseOpcode {
    Lookup = 1,
    /// No reply is ever sent for this opcode.
    Forget = 2,
    Getattr = 3,
    Setattr = 4,
    Readlink = 5,
    Symlink = 6,
    Mknod = 8,
    Mkdir = 9,
    Unlink = 10,
    Rmdir = 11,
    Rename = 12,
    Link = 13,
    Open = 14,
    Read = 15,
    Write = 16,
    Statfs = 17,
    Release = 18,
    Fsync = 20,
    Setxattr = 21,
    Getxattr = 22,
    Listxattr = 23,
    Removexattr = 24,
    Flush = 25,
    Init = 26,
    Opendir = 27,
    Readdir = 28,
    Releasedir = 29,
    Fsyncdir = 30,
    Getlk = 31,
    Setlk = 32,
    Setlkw = 33,
    Access = 34,
    Create = 35,
    Interrupt = 36,
    Bmap = 37,
    Destroy = 38,
    Ioctl = 39,
    Poll = 40,
    NotifyReply = 41,
    /// No reply is ever sent for this opcode.
    BatchForget = 42,
    Fallocate = 43,
    Readdirplus = 44,
    Rename2 = 45,
    Lseek = 46,
    CopyFileRange = 47,
    /// CUSE-specific INIT, answered "not implemented" by this engine.
    CuseInit = 4096,
}

impl FuseOpcode {
    /// Tries to convert a raw `u32` to a `FuseOpcode`.
    ///
    /// Returns `None` for values outside the enumeration; forward
    /// compatibility with newer kernels is handled at this boundary only.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Lookup),
            2 => Some(Self::Forget),
            3 => Some(Self::Getattr),
            4 => Some(Self::Setattr),
            5 => Some(Self::Readlink),
            6 => Some(Self::Symlink),
            8 => Some(Self::Mknod),
            9 => Some(Self::Mkdir),
            10 => Some(Self::Unlink),
            11 => Some(Self::Rmdir),
            12 => Some(Self::Rename),
            13 => Some(Self::Link),
            14 => Some(Self::Open),
            15 => Some(Self::Read),
            16 => Some(Self::Write),
            17 => Some(Self::Statfs),
            18 => Some(Self::Release),
            20 => Some(Self::Fsync),
            21 => Some(Self::Setxattr),
            22 => Some(Self::Getxattr),
            23 => Some(Self::Listxattr),
            24 => Some(Self::Removexattr),
            25 => Some(Self::Flush),
            26 => Some(Self::Init),
            27 => Some(Self::Opendir),
            28 => Some(Self::Readdir),
            29 => Some(Self::Releasedir),
            30 => Some(Self::Fsyncdir),
            31 => Some(Self::Getlk),
            32 => Some(Self::Setlk),
            33 => Some(Self::Setlkw),
            34 => Some(Self::Access),
            35 => Some(Self::Create),
            36 => Some(Self::Interrupt),
            37 => Some(Self::Bmap),
            38 => Some(Self::Destroy),
            39 => Some(Self::Ioctl),
            40 => Some(Self::Poll),
            41 => Some(Self::NotifyReply),
            42 => Some(Self::BatchForget),
            43 => Some(Self::Fallocate),
            44 => Some(Self::Readdirplus),
            45 => Some(Self::Rename2),
            46 => Some(Self::Lseek),
            47 => Some(Self::CopyFileRange),
            4096 => Some(Self::CuseInit),
            _ => None,
        }
    }

    /// Returns true for the forget-class opcodes, which must never produce a
    /// reply header on the wire, even when the handler fails.
    #[must_use]
    pub const fn is_forget_class(self) -> bool {
        matches!(self, Self::Forget | Self::BatchForget)
    }
}

// ============================================================================
// Headers
// ============================================================================

/// FUSE request header, prefixed to every message from the kernel.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseInHeader {
    /// Total message length, header included.
    pub len: u32,
    /// Operation code.
    pub opcode: u32,
    /// Unique request ID, echoed back unchanged in the reply.
    pub unique: u64,
    /// Target node ID (0 or `FUSE_ROOT_ID` for the root).
    pub nodeid: u64,
    /// Caller user ID.
    pub uid: u32,
    /// Caller group ID.
    pub gid: u32,
    /// Caller process ID.
    pub pid: u32,
    /// Padding.
    pub padding: u32,
}

impl FuseInHeader {
    /// Size of the request header.
    pub const SIZE: usize = size_of::<Self>();
}

/// FUSE reply header.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseOutHeader {
    /// Total message length, header included.
    pub len: u32,
    /// 0 on success, negated errno on failure.
    pub error: i32,
    /// Unique ID of the request being answered.
    pub unique: u64,
}

impl FuseOutHeader {
    /// Size of the reply header.
    pub const SIZE: usize = size_of::<Self>();

    /// Creates a success reply header.
    #[must_use]
    pub const fn success(unique: u64, len: u32) -> Self {
        Self {
            len,
            error: 0,
            unique,
        }
    }

    /// Creates an error reply header. `errno` is a positive errno value.
    #[must_use]
    pub const fn error(unique: u64, errno: i32) -> Self {
        Self {
            len: Self::SIZE as u32,
            error: -errno,
            unique,
        }
    }
}

// ============================================================================
// Common Records
// ============================================================================

/// File attributes.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub padding: u32,
}

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseKstatfs {
    /// Total data blocks in filesystem.
    pub blocks: u64,
    /// Free blocks in filesystem.
    pub bfree: u64,
    /// Free blocks available to an unprivileged user.
    pub bavail: u64,
    /// Total file nodes in filesystem.
    pub files: u64,
    /// Free file nodes in filesystem.
    pub ffree: u64,
    /// Optimal transfer block size.
    pub bsize: u32,
    /// Maximum length of filenames.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
    /// Padding.
    pub padding: u32,
    /// Reserved.
    pub spare: [u32; 6],
}

/// POSIX file lock.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseFileLock {
    pub start: u64,
    pub end: u64,
    pub r#type: u32,
    /// Thread group ID of the lock owner.
    pub pid: u32,
}

// ============================================================================
// Request Records
// ============================================================================

/// FUSE_INIT request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseInitIn {
    /// Major version supported by the kernel.
    pub major: u32,
    /// Minor version supported by the kernel.
    pub minor: u32,
    /// Maximum readahead size the kernel offers.
    pub max_readahead: u32,
    /// Capability flags advertised by the kernel.
    pub flags: u32,
}

/// FUSE_FORGET request. Never answered.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseForgetIn {
    /// Number of lookups to forget.
    pub nlookup: u64,
}

/// Single entry of a FUSE_BATCH_FORGET request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseForgetOne {
    /// Node ID to forget.
    pub nodeid: u64,
    /// Number of lookups to forget.
    pub nlookup: u64,
}

/// FUSE_BATCH_FORGET request, followed by `count` [`FuseForgetOne`] records.
/// Never answered.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseBatchForgetIn {
    /// Number of entries that follow.
    pub count: u32,
    /// Padding.
    pub dummy: u32,
}

/// FUSE_GETATTR request. Kernels below minor 9 send no payload at all.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseGetattrIn {
    /// Getattr flags (`FUSE_GETATTR_FH`).
    pub getattr_flags: u32,
    /// Padding.
    pub dummy: u32,
    /// File handle, when `getattr_flags` says so.
    pub fh: u64,
}

/// FUSE_SETATTR request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseSetattrIn {
    /// `FATTR_*` mask of the fields that are valid.
    pub valid: u32,
    pub padding: u32,
    pub fh: u64,
    pub size: u64,
    pub lock_owner: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub unused4: u32,
    pub uid: u32,
    pub gid: u32,
    pub unused5: u32,
}

/// FUSE_MKNOD request, followed by the name.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseMknodIn {
    /// File mode.
    pub mode: u32,
    /// Device number.
    pub rdev: u32,
    /// Umask (absent below minor 12).
    pub umask: u32,
    /// Padding.
    pub padding: u32,
}

impl FuseMknodIn {
    /// Decodes the record from an untrusted payload, accepting the 8-byte
    /// pre-7.12 layout. Returns the record and the offset where the name
    /// begins, or `None` if the payload is too short for either layout.
    #[must_use]
    pub fn decode_compat(payload: &[u8], minor: u32) -> Option<(Self, usize)> {
        if minor < 12 {
            let mode = u32::from_ne_bytes(payload.get(0..4)?.try_into().ok()?);
            let rdev = u32::from_ne_bytes(payload.get(4..8)?.try_into().ok()?);
            let arg = Self {
                mode,
                rdev,
                ..Self::default()
            };
            Some((arg, FUSE_COMPAT_MKNOD_IN_SIZE))
        } else {
            let arg = crate::codec::decode::<Self>(payload)?;
            Some((arg, size_of::<Self>()))
        }
    }
}

/// FUSE_MKDIR request, followed by the name.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseMkdirIn {
    /// Directory mode.
    pub mode: u32,
    /// Umask.
    pub umask: u32,
}

/// FUSE_RENAME request, followed by `oldname\0newname\0`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseRenameIn {
    /// New parent directory node ID.
    pub newdir: u64,
}

/// FUSE_RENAME2 request, followed by `oldname\0newname\0`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseRename2In {
    /// New parent directory node ID.
    pub newdir: u64,
    /// Rename flags (`RENAME_NOREPLACE`, `RENAME_EXCHANGE`).
    pub flags: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_LINK request, followed by the new name.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseLinkIn {
    /// Node ID of the existing inode.
    pub oldnodeid: u64,
}

/// FUSE_OPEN / FUSE_OPENDIR request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseOpenIn {
    /// Open flags.
    pub flags: u32,
    /// Unused.
    pub unused: u32,
}

/// FUSE_CREATE request, followed by the name.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseCreateIn {
    /// Open flags.
    pub flags: u32,
    /// File mode.
    pub mode: u32,
    /// Umask.
    pub umask: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_READ / FUSE_READDIR / FUSE_READDIRPLUS request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseReadIn {
    /// File handle.
    pub fh: u64,
    /// Read offset (stream cursor for directory enumeration).
    pub offset: u64,
    /// Number of bytes to read.
    pub size: u32,
    /// Read flags.
    pub read_flags: u32,
    /// Lock owner.
    pub lock_owner: u64,
    /// Open flags.
    pub flags: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_WRITE request, followed by the data.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseWriteIn {
    /// File handle.
    pub fh: u64,
    /// Write offset.
    pub offset: u64,
    /// Number of data bytes that follow.
    pub size: u32,
    /// Write flags.
    pub write_flags: u32,
    /// Lock owner (absent below minor 9).
    pub lock_owner: u64,
    /// Open flags (absent below minor 9).
    pub flags: u32,
    /// Padding.
    pub padding: u32,
}

impl FuseWriteIn {
    /// Decodes the record from an untrusted payload, accepting the 24-byte
    /// pre-7.9 layout. Returns the record and the offset where the data
    /// begins, or `None` if the payload is too short for either layout.
    #[must_use]
    pub fn decode_compat(payload: &[u8], minor: u32) -> Option<(Self, usize)> {
        if minor < 9 {
            let fh = u64::from_ne_bytes(payload.get(0..8)?.try_into().ok()?);
            let offset = u64::from_ne_bytes(payload.get(8..16)?.try_into().ok()?);
            let size = u32::from_ne_bytes(payload.get(16..20)?.try_into().ok()?);
            let write_flags = u32::from_ne_bytes(payload.get(20..24)?.try_into().ok()?);
            let arg = Self {
                fh,
                offset,
                size,
                write_flags,
                ..Self::default()
            };
            Some((arg, FUSE_COMPAT_WRITE_IN_SIZE))
        } else {
            let arg = crate::codec::decode::<Self>(payload)?;
            Some((arg, size_of::<Self>()))
        }
    }
}

/// FUSE_RELEASE / FUSE_RELEASEDIR request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseReleaseIn {
    /// File handle.
    pub fh: u64,
    /// Open flags.
    pub flags: u32,
    /// Release flags (`FUSE_RELEASE_FLUSH`).
    pub release_flags: u32,
    /// Lock owner.
    pub lock_owner: u64,
}

/// FUSE_FLUSH request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseFlushIn {
    /// File handle.
    pub fh: u64,
    /// Unused.
    pub unused: u32,
    /// Padding.
    pub padding: u32,
    /// Lock owner.
    pub lock_owner: u64,
}

/// FUSE_FSYNC / FUSE_FSYNCDIR request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseFsyncIn {
    /// File handle.
    pub fh: u64,
    /// Bit 0 set means datasync.
    pub fsync_flags: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_SETXATTR request, followed by `name\0value`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseSetxattrIn {
    /// Attribute value size.
    pub size: u32,
    /// Setxattr flags.
    pub flags: u32,
}

/// FUSE_GETXATTR / FUSE_LISTXATTR request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseGetxattrIn {
    /// Maximum size of the attribute value to return; 0 asks for the size
    /// only.
    pub size: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_GETLK / FUSE_SETLK / FUSE_SETLKW request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseLkIn {
    pub fh: u64,
    pub owner: u64,
    pub lk: FuseFileLock,
    pub lk_flags: u32,
    pub padding: u32,
}

/// FUSE_ACCESS request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseAccessIn {
    /// Access mode mask.
    pub mask: u32,
    /// Padding.
    pub padding: u32,
}

/// FUSE_INTERRUPT request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseInterruptIn {
    /// Unique ID of the in-flight request to interrupt.
    pub unique: u64,
}

/// FUSE_BMAP request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseBmapIn {
    pub block: u64,
    pub blocksize: u32,
    pub padding: u32,
}

/// FUSE_IOCTL request, followed by `in_size` input bytes.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseIoctlIn {
    pub fh: u64,
    pub flags: u32,
    pub cmd: u32,
    pub arg: u64,
    pub in_size: u32,
    pub out_size: u32,
}

/// FUSE_POLL request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FusePollIn {
    pub fh: u64,
    /// Kernel-side poll handle for later notification.
    pub kh: u64,
    pub flags: u32,
    pub padding: u32,
}

/// FUSE_FALLOCATE request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseFallocateIn {
    pub fh: u64,
    pub offset: u64,
    pub length: u64,
    pub mode: u32,
    pub padding: u32,
}

/// FUSE_LSEEK request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseLseekIn {
    pub fh: u64,
    pub offset: u64,
    /// `SEEK_SET`, `SEEK_CUR`, `SEEK_END`, `SEEK_DATA`, `SEEK_HOLE`.
    pub whence: u32,
    pub padding: u32,
}

/// FUSE_COPY_FILE_RANGE request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseCopyFileRangeIn {
    pub fh_in: u64,
    pub off_in: u64,
    pub nodeid_out: u64,
    pub fh_out: u64,
    pub off_out: u64,
    pub len: u64,
    pub flags: u64,
}

// ============================================================================
// Reply Records
// ============================================================================

/// FUSE_INIT reply.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FuseInitOut {
    /// Negotiated major version.
    pub major: u32,
    /// Negotiated minor version.
    pub minor: u32,
    /// Granted readahead size.
    pub max_readahead: u32,
    /// Negotiated capability flags.
    pub flags: u32,
    /// Maximum number of background requests.
    pub max_background: u16,
    /// Background queue congestion threshold.
    pub congestion_threshold: u16,
    /// Maximum write size.
    pub max_write: u32,
    /// Timestamp granularity in nanoseconds.
    pub time_gran: u32,
    /// Maximum pages per request (honored when `FUSE_MAX_PAGES` negotiated).
    pub max_pages: u16,
    /// Padding.
    pub padding: u16,
    /// Reserved.
    pub unused: [u32; 8],
}

impl Default for FuseInitOut {
    fn default() -> Self {
        Self {
            major: FUSE_KERNEL_VERSION,
            minor: FUSE_KERNEL_MINOR_VERSION,
            max_readahead: 0,
            flags: 0,
            max_background: 0,
            congestion_threshold: 0,
            max_write: 0,
            time_gran: 1,
            max_pages: 0,
            padding: 0,
            unused: [0; 8],
        }
    }
}

impl FuseInitOut {
    /// Number of bytes of this record a peer on the given minor version
    /// accepts: 8 below minor 5, 24 below minor 23, the full record
    /// otherwise.
    #[must_use]
    pub const fn serialized_size(minor: u32) -> usize {
        if minor < 5 {
            FUSE_COMPAT_INIT_OUT_SIZE
        } else if minor < 23 {
            FUSE_COMPAT_22_INIT_OUT_SIZE
        } else {
            size_of::<Self>()
        }
    }
}

/// Entry reply (lookup, mknod, mkdir, symlink, link, create).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseEntryOut {
    /// Node ID of the entry.
    pub nodeid: u64,
    /// Inode generation: the `(nodeid, generation)` pair must be unique for
    /// the lifetime of the filesystem instance.
    pub generation: u64,
    /// Cache timeout for the name, seconds.
    pub entry_valid: u64,
    /// Cache timeout for the attributes, seconds.
    pub attr_valid: u64,
    /// Name timeout, nanosecond remainder.
    pub entry_valid_nsec: u32,
    /// Attribute timeout, nanosecond remainder.
    pub attr_valid_nsec: u32,
    /// File attributes.
    pub attr: FuseAttr,
}

impl FuseEntryOut {
    /// Bytes accepted by a peer on the given minor version (120 below 9).
    #[must_use]
    pub const fn serialized_size(minor: u32) -> usize {
        if minor < 9 {
            FUSE_COMPAT_ENTRY_OUT_SIZE
        } else {
            size_of::<Self>()
        }
    }
}

/// Attribute reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseAttrOut {
    /// Cache timeout for the attributes, seconds.
    pub attr_valid: u64,
    /// Attribute timeout, nanosecond remainder.
    pub attr_valid_nsec: u32,
    /// Padding.
    pub dummy: u32,
    /// File attributes.
    pub attr: FuseAttr,
}

impl FuseAttrOut {
    /// Bytes accepted by a peer on the given minor version (96 below 9).
    #[must_use]
    pub const fn serialized_size(minor: u32) -> usize {
        if minor < 9 {
            FUSE_COMPAT_ATTR_OUT_SIZE
        } else {
            size_of::<Self>()
        }
    }
}

/// Open reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseOpenOut {
    /// File handle chosen by the filesystem.
    pub fh: u64,
    /// `FOPEN_*` flags.
    pub open_flags: u32,
    /// Padding.
    pub padding: u32,
}

/// Write reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseWriteOut {
    /// Number of bytes written.
    pub size: u32,
    /// Padding.
    pub padding: u32,
}

/// Statfs reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseStatfsOut {
    /// Filesystem statistics.
    pub st: FuseKstatfs,
}

impl FuseStatfsOut {
    /// Bytes accepted by a peer on the given minor version (48 below 4).
    #[must_use]
    pub const fn serialized_size(minor: u32) -> usize {
        if minor < 4 {
            FUSE_COMPAT_STATFS_SIZE
        } else {
            size_of::<Self>()
        }
    }
}

/// Getxattr / listxattr size reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseGetxattrOut {
    /// Attribute value size.
    pub size: u32,
    /// Padding.
    pub padding: u32,
}

/// Getlk reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseLkOut {
    pub lk: FuseFileLock,
}

/// Bmap reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseBmapOut {
    pub block: u64,
}

/// Ioctl reply, followed by `out_size` output bytes.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseIoctlOut {
    pub result: i32,
    pub flags: u32,
    pub in_iovs: u32,
    pub out_iovs: u32,
}

/// Poll reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FusePollOut {
    pub revents: u32,
    pub padding: u32,
}

/// Lseek reply.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseLseekOut {
    pub offset: u64,
}

// ============================================================================
// Directory Entries
// ============================================================================

/// Directory entry header, followed by `namelen` name bytes and zero padding
/// to the next 8-byte boundary.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseDirent {
    /// Inode number.
    pub ino: u64,
    /// Opaque cursor for resuming enumeration after this entry.
    pub off: u64,
    /// Name length, padding excluded.
    pub namelen: u32,
    /// Entry type (`DT_*`).
    pub r#type: u32,
}

impl FuseDirent {
    /// Offset of the name bytes within a serialized entry.
    pub const NAME_OFFSET: usize = size_of::<Self>();
}

/// Readdirplus entry header: a full entry reply followed by the dirent.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FuseDirentplus {
    pub entry_out: FuseEntryOut,
    pub dirent: FuseDirent,
}

impl FuseDirentplus {
    /// Offset of the name bytes within a serialized entry.
    pub const NAME_OFFSET: usize = size_of::<Self>();
}

// ============================================================================
// Wire Record Markers
// ============================================================================

macro_rules! impl_wire_record {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl WireRecord for $t {})*
    };
}

impl_wire_record!(
    FuseInHeader,
    FuseOutHeader,
    FuseAttr,
    FuseKstatfs,
    FuseFileLock,
    FuseInitIn,
    FuseForgetIn,
    FuseForgetOne,
    FuseBatchForgetIn,
    FuseGetattrIn,
    FuseSetattrIn,
    FuseMknodIn,
    FuseMkdirIn,
    FuseRenameIn,
    FuseRename2In,
    FuseLinkIn,
    FuseOpenIn,
    FuseCreateIn,
    FuseReadIn,
    FuseWriteIn,
    FuseReleaseIn,
    FuseFlushIn,
    FuseFsyncIn,
    FuseSetxattrIn,
    FuseGetxattrIn,
    FuseLkIn,
    FuseAccessIn,
    FuseInterruptIn,
    FuseBmapIn,
    FuseIoctlIn,
    FusePollIn,
    FuseFallocateIn,
    FuseLseekIn,
    FuseCopyFileRangeIn,
    FuseInitOut,
    FuseEntryOut,
    FuseAttrOut,
    FuseOpenOut,
    FuseWriteOut,
    FuseStatfsOut,
    FuseGetxattrOut,
    FuseLkOut,
    FuseBmapOut,
    FuseIoctlOut,
    FusePollOut,
    FuseLseekOut,
    FuseDirent,
    FuseDirentplus,
);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Layout checks against the sizes fixed by the kernel ABI. A failure
    // here means the struct no longer matches the wire format.
    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<FuseInHeader>(), 40);
        assert_eq!(size_of::<FuseOutHeader>(), 16);
        assert_eq!(size_of::<FuseAttr>(), 88);
        assert_eq!(size_of::<FuseKstatfs>(), 80);
        assert_eq!(size_of::<FuseFileLock>(), 24);
        assert_eq!(size_of::<FuseEntryOut>(), 128);
        assert_eq!(size_of::<FuseAttrOut>(), 104);
        assert_eq!(size_of::<FuseInitIn>(), 16);
        assert_eq!(size_of::<FuseInitOut>(), 64);
        assert_eq!(size_of::<FuseSetattrIn>(), 88);
        assert_eq!(size_of::<FuseWriteIn>(), 40);
        assert_eq!(size_of::<FuseMknodIn>(), 16);
        assert_eq!(size_of::<FuseReadIn>(), 40);
        assert_eq!(size_of::<FuseLkIn>(), 48);
        assert_eq!(size_of::<FuseIoctlIn>(), 32);
        assert_eq!(size_of::<FuseCopyFileRangeIn>(), 56);
        assert_eq!(size_of::<FuseDirent>(), 24);
        assert_eq!(size_of::<FuseDirentplus>(), 152);
    }

    #[test]
    fn test_compat_sizes_are_prefixes() {
        assert!(FUSE_COMPAT_ENTRY_OUT_SIZE < size_of::<FuseEntryOut>());
        assert!(FUSE_COMPAT_ATTR_OUT_SIZE < size_of::<FuseAttrOut>());
        assert!(FUSE_COMPAT_WRITE_IN_SIZE < size_of::<FuseWriteIn>());
        assert!(FUSE_COMPAT_MKNOD_IN_SIZE < size_of::<FuseMknodIn>());
        assert!(FUSE_COMPAT_STATFS_SIZE < size_of::<FuseStatfsOut>());
        assert!(FUSE_COMPAT_22_INIT_OUT_SIZE < size_of::<FuseInitOut>());
    }

    #[test]
    fn test_serialized_size_gates() {
        assert_eq!(FuseInitOut::serialized_size(4), 8);
        assert_eq!(FuseInitOut::serialized_size(5), 24);
        assert_eq!(FuseInitOut::serialized_size(22), 24);
        assert_eq!(FuseInitOut::serialized_size(23), 64);
        assert_eq!(FuseEntryOut::serialized_size(8), 120);
        assert_eq!(FuseEntryOut::serialized_size(9), 128);
        assert_eq!(FuseAttrOut::serialized_size(8), 96);
        assert_eq!(FuseAttrOut::serialized_size(28), 104);
        assert_eq!(FuseStatfsOut::serialized_size(3), 48);
        assert_eq!(FuseStatfsOut::serialized_size(4), 80);
    }

    #[test]
    fn test_opcode_round_trip() {
        for raw in 0..=4200u32 {
            if let Some(op) = FuseOpcode::from_u32(raw) {
                assert_eq!(op as u32, raw);
            }
        }
    }

    #[test]
    fn test_opcode_gaps_rejected() {
        assert!(FuseOpcode::from_u32(0).is_none());
        assert!(FuseOpcode::from_u32(7).is_none());
        assert!(FuseOpcode::from_u32(19).is_none());
        assert!(FuseOpcode::from_u32(48).is_none());
        assert!(FuseOpcode::from_u32(9999).is_none());
    }

    #[test]
    fn test_forget_class() {
        assert!(FuseOpcode::Forget.is_forget_class());
        assert!(FuseOpcode::BatchForget.is_forget_class());
        assert!(!FuseOpcode::Lookup.is_forget_class());
        assert!(!FuseOpcode::Interrupt.is_forget_class());
    }

    #[test]
    fn test_write_in_compat_decode() {
        let full = FuseWriteIn {
            fh: 7,
            offset: 4096,
            size: 512,
            write_flags: 1,
            lock_owner: 99,
            flags: 2,
            padding: 0,
        };
        let bytes = crate::codec::bytes_of(&full);

        let (new, off) = FuseWriteIn::decode_compat(bytes, 28).unwrap();
        assert_eq!(off, size_of::<FuseWriteIn>());
        assert_eq!(new.lock_owner, 99);

        let (old, off) = FuseWriteIn::decode_compat(&bytes[..24], 8).unwrap();
        assert_eq!(off, FUSE_COMPAT_WRITE_IN_SIZE);
        assert_eq!(old.fh, 7);
        assert_eq!(old.size, 512);
        assert_eq!(old.lock_owner, 0);

        assert!(FuseWriteIn::decode_compat(&bytes[..16], 8).is_none());
        assert!(FuseWriteIn::decode_compat(&bytes[..24], 28).is_none());
    }

    #[test]
    fn test_mknod_in_compat_decode() {
        let full = FuseMknodIn {
            mode: 0o644,
            rdev: 5,
            umask: 0o022,
            padding: 0,
        };
        let bytes = crate::codec::bytes_of(&full);

        let (old, off) = FuseMknodIn::decode_compat(&bytes[..8], 11).unwrap();
        assert_eq!(off, FUSE_COMPAT_MKNOD_IN_SIZE);
        assert_eq!(old.mode, 0o644);
        assert_eq!(old.umask, 0);

        let (new, off) = FuseMknodIn::decode_compat(bytes, 12).unwrap();
        assert_eq!(off, size_of::<FuseMknodIn>());
        assert_eq!(new.umask, 0o022);
    }

    #[test]
    fn test_out_header_error_is_negated() {
        let header = FuseOutHeader::error(42, libc::ENOENT);
        assert_eq!(header.error, -libc::ENOENT);
        assert_eq!(header.len as usize, FuseOutHeader::SIZE);
        assert_eq!(header.unique, 42);
    }
}
