//! # fusebridge-proto
//!
//! Byte-exact FUSE kernel wire format, protocol version 7.28.
//!
//! This crate defines the fixed-layout binary records exchanged with the
//! in-kernel FUSE driver over the `/dev/fuse` character device: the request
//! and reply headers, every per-opcode input/output record, the opcode
//! enumeration, and the variable-length directory entry stream.
//!
//! All structures are padded to a 64-bit boundary so that 32-bit userspace
//! works under 64-bit kernels; numeric opcode values are externally defined
//! and must never be renumbered.
//!
//! Records whose current layout extends an older, shorter layout carry a
//! compat size (`FUSE_COMPAT_*`): a peer on an older minor version sends and
//! accepts only that prefix, and [`serialized_size`](FuseEntryOut::serialized_size)
//! style helpers report how many bytes are valid for a negotiated minor.
//!
//! Reference: `include/fuse-lite/fuse_kernel.h` (FUSE 7.28).

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod abi;
pub mod codec;
pub mod dirent;

pub use abi::{
    FuseAccessIn, FuseAttr, FuseAttrOut, FuseBatchForgetIn, FuseBmapIn, FuseBmapOut,
    FuseCopyFileRangeIn, FuseCreateIn, FuseDirent, FuseDirentplus, FuseEntryOut, FuseFallocateIn,
    FuseFileLock, FuseFlushIn, FuseForgetIn, FuseForgetOne, FuseFsyncIn, FuseGetattrIn,
    FuseGetxattrIn, FuseGetxattrOut, FuseInHeader, FuseInitIn, FuseInitOut, FuseInterruptIn,
    FuseIoctlIn, FuseIoctlOut, FuseKstatfs, FuseLinkIn, FuseLkIn, FuseLkOut, FuseLseekIn,
    FuseLseekOut, FuseMkdirIn, FuseMknodIn, FuseOpcode, FuseOpenIn, FuseOpenOut, FuseOutHeader,
    FusePollIn, FusePollOut, FuseReadIn, FuseReleaseIn, FuseRenameIn, FuseRename2In,
    FuseSetattrIn, FuseSetxattrIn, FuseStatfsOut, FuseWriteIn, FuseWriteOut,
    FUSE_BUFFER_HEADER_SIZE, FUSE_KERNEL_MINOR_VERSION, FUSE_KERNEL_VERSION, FUSE_MAX_MAX_PAGES,
    FUSE_MIN_READ_BUFFER, FUSE_ROOT_ID,
};
pub use codec::{bytes_of, decode, WireRecord};
pub use dirent::{dirent_align, dirent_size, DirentBuf, DirentIter};
