//! Request dispatch: opcode decode, handler invocation, reply encoding.
//!
//! The dispatcher turns a validated message into a typed [`Operation`],
//! calls the corresponding [`Filesystem`] method, and encodes the reply
//! with the record prefix the negotiated protocol minor accepts. It also
//! tracks in-flight requests so `FUSE_INTERRUPT` can reach a running
//! handler.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fusebridge_proto::{
    decode, DirentBuf, FuseAccessIn, FuseBatchForgetIn, FuseBmapIn, FuseCopyFileRangeIn,
    FuseCreateIn, FuseFallocateIn, FuseFlushIn, FuseForgetIn, FuseForgetOne, FuseFsyncIn,
    FuseGetattrIn, FuseGetxattrIn, FuseGetxattrOut, FuseInHeader, FuseInitIn, FuseInterruptIn,
    FuseIoctlIn, FuseIoctlOut, FuseLinkIn, FuseLkIn, FuseLseekIn, FuseMkdirIn, FuseMknodIn,
    FuseOpcode, FuseOpenIn, FusePollIn, FuseReadIn, FuseReleaseIn, FuseRename2In, FuseRenameIn,
    FuseSetattrIn, FuseSetxattrIn, FuseStatfsOut, FuseWriteIn, WireRecord,
};

use crate::error::ProtocolError;
use crate::framer::ReplyBuilder;
use crate::negotiate::Negotiation;
use crate::ops::{Errno, Filesystem, RequestContext, XattrReply};

// ============================================================================
// Typed Operations
// ============================================================================

/// One decoded request, payload views borrowed from the receive buffer.
#[derive(Debug)]
pub enum Operation<'a> {
    Lookup { name: &'a OsStr },
    Forget { arg: FuseForgetIn },
    Getattr { arg: FuseGetattrIn },
    Setattr { arg: FuseSetattrIn },
    Readlink,
    Symlink { name: &'a OsStr, target: &'a OsStr },
    Mknod { arg: FuseMknodIn, name: &'a OsStr },
    Mkdir { arg: FuseMkdirIn, name: &'a OsStr },
    Unlink { name: &'a OsStr },
    Rmdir { name: &'a OsStr },
    Rename { newdir: u64, flags: u32, name: &'a OsStr, newname: &'a OsStr },
    Link { arg: FuseLinkIn, name: &'a OsStr },
    Open { arg: FuseOpenIn },
    Read { arg: FuseReadIn },
    Write { arg: FuseWriteIn, data: &'a [u8] },
    Statfs,
    Release { arg: FuseReleaseIn },
    Fsync { arg: FuseFsyncIn },
    Setxattr { arg: FuseSetxattrIn, name: &'a OsStr, value: &'a [u8] },
    Getxattr { arg: FuseGetxattrIn, name: &'a OsStr },
    Listxattr { arg: FuseGetxattrIn },
    Removexattr { name: &'a OsStr },
    Flush { arg: FuseFlushIn },
    Init { arg: FuseInitIn },
    Opendir { arg: FuseOpenIn },
    Readdir { arg: FuseReadIn },
    Releasedir { arg: FuseReleaseIn },
    Fsyncdir { arg: FuseFsyncIn },
    Getlk { arg: FuseLkIn },
    Setlk { arg: FuseLkIn, sleep: bool },
    Access { arg: FuseAccessIn },
    Create { arg: FuseCreateIn, name: &'a OsStr },
    Interrupt { arg: FuseInterruptIn },
    Bmap { arg: FuseBmapIn },
    Destroy,
    Ioctl { arg: FuseIoctlIn, data: &'a [u8] },
    Poll { arg: FusePollIn },
    NotifyReply,
    BatchForget { nodes: Vec<FuseForgetOne> },
    Fallocate { arg: FuseFallocateIn },
    Readdirplus { arg: FuseReadIn },
    Lseek { arg: FuseLseekIn },
    CopyFileRange { arg: FuseCopyFileRangeIn },
    CuseInit,
}

fn record<T: WireRecord>(opcode: FuseOpcode, payload: &[u8]) -> Result<T, ProtocolError> {
    decode(payload).ok_or(ProtocolError::TruncatedPayload {
        opcode,
        needed: size_of::<T>(),
        got: payload.len(),
    })
}

fn record_rest<T: WireRecord>(
    opcode: FuseOpcode,
    payload: &[u8],
) -> Result<(T, &[u8]), ProtocolError> {
    let arg = record::<T>(opcode, payload)?;
    Ok((arg, &payload[size_of::<T>()..]))
}

/// Splits `name\0` off the front of a payload.
fn split_name(opcode: FuseOpcode, payload: &[u8]) -> Result<(&OsStr, &[u8]), ProtocolError> {
    let nul = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::BadName { opcode })?;
    Ok((OsStr::from_bytes(&payload[..nul]), &payload[nul + 1..]))
}

fn single_name(opcode: FuseOpcode, payload: &[u8]) -> Result<&OsStr, ProtocolError> {
    let (name, _) = split_name(opcode, payload)?;
    Ok(name)
}

fn two_names(opcode: FuseOpcode, payload: &[u8]) -> Result<(&OsStr, &OsStr), ProtocolError> {
    let (first, rest) = split_name(opcode, payload)?;
    let (second, _) = split_name(opcode, rest)?;
    Ok((first, second))
}

impl<'a> Operation<'a> {
    /// Decodes the payload for `opcode`, honoring the compat layouts of the
    /// negotiated `minor`.
    pub fn parse(
        opcode: FuseOpcode,
        payload: &'a [u8],
        minor: u32,
    ) -> Result<Self, ProtocolError> {
        match opcode {
            FuseOpcode::Lookup => Ok(Self::Lookup {
                name: single_name(opcode, payload)?,
            }),
            FuseOpcode::Forget => Ok(Self::Forget {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Getattr => {
                // Kernels below minor 9 send no getattr payload.
                let arg = if minor < 9 {
                    FuseGetattrIn::default()
                } else {
                    record(opcode, payload)?
                };
                Ok(Self::Getattr { arg })
            }
            FuseOpcode::Setattr => Ok(Self::Setattr {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Readlink => Ok(Self::Readlink),
            FuseOpcode::Symlink => {
                let (name, target) = two_names(opcode, payload)?;
                Ok(Self::Symlink { name, target })
            }
            FuseOpcode::Mknod => {
                let (arg, name_off) = FuseMknodIn::decode_compat(payload, minor).ok_or(
                    ProtocolError::TruncatedPayload {
                        opcode,
                        needed: size_of::<FuseMknodIn>(),
                        got: payload.len(),
                    },
                )?;
                Ok(Self::Mknod {
                    arg,
                    name: single_name(opcode, &payload[name_off..])?,
                })
            }
            FuseOpcode::Mkdir => {
                let (arg, rest) = record_rest::<FuseMkdirIn>(opcode, payload)?;
                Ok(Self::Mkdir {
                    arg,
                    name: single_name(opcode, rest)?,
                })
            }
            FuseOpcode::Unlink => Ok(Self::Unlink {
                name: single_name(opcode, payload)?,
            }),
            FuseOpcode::Rmdir => Ok(Self::Rmdir {
                name: single_name(opcode, payload)?,
            }),
            FuseOpcode::Rename => {
                let (arg, rest) = record_rest::<FuseRenameIn>(opcode, payload)?;
                let (name, newname) = two_names(opcode, rest)?;
                Ok(Self::Rename {
                    newdir: arg.newdir,
                    flags: 0,
                    name,
                    newname,
                })
            }
            FuseOpcode::Rename2 => {
                let (arg, rest) = record_rest::<FuseRename2In>(opcode, payload)?;
                let (name, newname) = two_names(opcode, rest)?;
                Ok(Self::Rename {
                    newdir: arg.newdir,
                    flags: arg.flags,
                    name,
                    newname,
                })
            }
            FuseOpcode::Link => {
                let (arg, rest) = record_rest::<FuseLinkIn>(opcode, payload)?;
                Ok(Self::Link {
                    arg,
                    name: single_name(opcode, rest)?,
                })
            }
            FuseOpcode::Open => Ok(Self::Open {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Read => Ok(Self::Read {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Write => {
                let (arg, data_off) = FuseWriteIn::decode_compat(payload, minor).ok_or(
                    ProtocolError::TruncatedPayload {
                        opcode,
                        needed: size_of::<FuseWriteIn>(),
                        got: payload.len(),
                    },
                )?;
                let data = &payload[data_off..];
                if data.len() != arg.size as usize {
                    return Err(ProtocolError::TruncatedPayload {
                        opcode,
                        needed: data_off + arg.size as usize,
                        got: payload.len(),
                    });
                }
                Ok(Self::Write { arg, data })
            }
            FuseOpcode::Statfs => Ok(Self::Statfs),
            FuseOpcode::Release => Ok(Self::Release {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Fsync => Ok(Self::Fsync {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Setxattr => {
                let (arg, rest) = record_rest::<FuseSetxattrIn>(opcode, payload)?;
                let (name, value) = split_name(opcode, rest)?;
                if value.len() < arg.size as usize {
                    return Err(ProtocolError::TruncatedPayload {
                        opcode,
                        needed: arg.size as usize,
                        got: value.len(),
                    });
                }
                Ok(Self::Setxattr {
                    arg,
                    name,
                    value: &value[..arg.size as usize],
                })
            }
            FuseOpcode::Getxattr => {
                let (arg, rest) = record_rest::<FuseGetxattrIn>(opcode, payload)?;
                Ok(Self::Getxattr {
                    arg,
                    name: single_name(opcode, rest)?,
                })
            }
            FuseOpcode::Listxattr => Ok(Self::Listxattr {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Removexattr => Ok(Self::Removexattr {
                name: single_name(opcode, payload)?,
            }),
            FuseOpcode::Flush => Ok(Self::Flush {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Init => Ok(Self::Init {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Opendir => Ok(Self::Opendir {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Readdir => Ok(Self::Readdir {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Releasedir => Ok(Self::Releasedir {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Fsyncdir => Ok(Self::Fsyncdir {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Getlk => Ok(Self::Getlk {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Setlk => Ok(Self::Setlk {
                arg: record(opcode, payload)?,
                sleep: false,
            }),
            FuseOpcode::Setlkw => Ok(Self::Setlk {
                arg: record(opcode, payload)?,
                sleep: true,
            }),
            FuseOpcode::Access => Ok(Self::Access {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Create => {
                let (arg, rest) = record_rest::<FuseCreateIn>(opcode, payload)?;
                Ok(Self::Create {
                    arg,
                    name: single_name(opcode, rest)?,
                })
            }
            FuseOpcode::Interrupt => Ok(Self::Interrupt {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Bmap => Ok(Self::Bmap {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Destroy => Ok(Self::Destroy),
            FuseOpcode::Ioctl => {
                let (arg, rest) = record_rest::<FuseIoctlIn>(opcode, payload)?;
                if rest.len() < arg.in_size as usize {
                    return Err(ProtocolError::TruncatedPayload {
                        opcode,
                        needed: arg.in_size as usize,
                        got: rest.len(),
                    });
                }
                Ok(Self::Ioctl {
                    arg,
                    data: &rest[..arg.in_size as usize],
                })
            }
            FuseOpcode::Poll => Ok(Self::Poll {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::NotifyReply => Ok(Self::NotifyReply),
            FuseOpcode::BatchForget => {
                let (arg, rest) = record_rest::<FuseBatchForgetIn>(opcode, payload)?;
                let available = rest.len() / size_of::<FuseForgetOne>();
                let count = (arg.count as usize).min(available);
                let mut nodes = Vec::with_capacity(count);
                for i in 0..count {
                    let chunk = &rest[i * size_of::<FuseForgetOne>()..];
                    if let Some(one) = decode::<FuseForgetOne>(chunk) {
                        nodes.push(one);
                    }
                }
                Ok(Self::BatchForget { nodes })
            }
            FuseOpcode::Fallocate => Ok(Self::Fallocate {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Readdirplus => Ok(Self::Readdirplus {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::Lseek => Ok(Self::Lseek {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::CopyFileRange => Ok(Self::CopyFileRange {
                arg: record(opcode, payload)?,
            }),
            FuseOpcode::CuseInit => Ok(Self::CuseInit),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Drives [`Filesystem`] handlers and tracks in-flight requests.
pub struct Dispatcher {
    fs: Arc<dyn Filesystem>,
    inflight: Mutex<HashMap<u64, CancellationToken>>,
}

impl Dispatcher {
    /// Creates a dispatcher for the given filesystem.
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The filesystem this dispatcher drives.
    #[must_use]
    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// Registers a request as in-flight, returning its interrupt token.
    ///
    /// Must happen before the handler starts so an interrupt arriving right
    /// after the request can find it.
    pub async fn register(&self, unique: u64) -> CancellationToken {
        let token = CancellationToken::new();
        self.inflight.lock().await.insert(unique, token.clone());
        token
    }

    /// Removes a completed request from the in-flight table.
    pub async fn complete(&self, unique: u64) {
        self.inflight.lock().await.remove(&unique);
    }

    /// Cancels an in-flight request. A request that already completed is
    /// silently ignored.
    pub async fn interrupt(&self, unique: u64) {
        if let Some(token) = self.inflight.lock().await.get(&unique) {
            tracing::debug!(unique, "interrupting request");
            token.cancel();
        } else {
            tracing::debug!(unique, "interrupt for unknown request, ignored");
        }
    }

    /// Number of requests currently in flight.
    pub async fn inflight_len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Decodes and executes one request, returning the serialized reply.
    ///
    /// `None` means the opcode's contract is to stay silent (forget class,
    /// interrupt, notify acknowledgements); everything else gets exactly one
    /// reply, an error reply if decoding or the handler failed.
    pub async fn dispatch(
        &self,
        header: &FuseInHeader,
        opcode: FuseOpcode,
        payload: &[u8],
        negotiation: &Negotiation,
        token: CancellationToken,
    ) -> Option<Bytes> {
        tracing::debug!(
            unique = header.unique,
            opcode = ?opcode,
            nodeid = header.nodeid,
            "dispatch"
        );

        let op = match Operation::parse(opcode, payload, negotiation.minor) {
            Ok(op) => op,
            Err(err) => {
                tracing::warn!(unique = header.unique, error = %err, "undecodable request");
                if opcode.is_forget_class() {
                    return None;
                }
                let mut reply = ReplyBuilder::new();
                reply.write_error(header.unique, Errno::EINVAL);
                return Some(reply.finish());
            }
        };

        let ctx = RequestContext::new(header, token);
        let minor = negotiation.minor;
        let mut reply = ReplyBuilder::new();

        match op {
            Operation::Lookup { name } => match self.fs.lookup(&ctx, name).await {
                Ok(entry) => reply.write_record_capped(
                    header.unique,
                    &entry,
                    fusebridge_proto::FuseEntryOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Forget { arg } => {
                self.fs.forget(&ctx, arg.nlookup).await;
                return None;
            }
            Operation::BatchForget { nodes } => {
                self.fs.batch_forget(&ctx, &nodes).await;
                return None;
            }
            Operation::Getattr { arg } => match self.fs.getattr(&ctx, arg).await {
                Ok(attr) => reply.write_record_capped(
                    header.unique,
                    &attr,
                    fusebridge_proto::FuseAttrOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Setattr { arg } => match self.fs.setattr(&ctx, arg).await {
                Ok(attr) => reply.write_record_capped(
                    header.unique,
                    &attr,
                    fusebridge_proto::FuseAttrOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Readlink => match self.fs.readlink(&ctx).await {
                Ok(target) => reply.write_bytes(header.unique, &target),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Symlink { name, target } => {
                match self.fs.symlink(&ctx, name, target).await {
                    Ok(entry) => reply.write_record_capped(
                        header.unique,
                        &entry,
                        fusebridge_proto::FuseEntryOut::serialized_size(minor),
                    ),
                    Err(errno) => reply.write_error(header.unique, errno),
                }
            }
            Operation::Mknod { arg, name } => match self.fs.mknod(&ctx, arg, name).await {
                Ok(entry) => reply.write_record_capped(
                    header.unique,
                    &entry,
                    fusebridge_proto::FuseEntryOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Mkdir { arg, name } => match self.fs.mkdir(&ctx, arg, name).await {
                Ok(entry) => reply.write_record_capped(
                    header.unique,
                    &entry,
                    fusebridge_proto::FuseEntryOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Unlink { name } => {
                self.write_unit(&mut reply, header.unique, self.fs.unlink(&ctx, name).await);
            }
            Operation::Rmdir { name } => {
                self.write_unit(&mut reply, header.unique, self.fs.rmdir(&ctx, name).await);
            }
            Operation::Rename {
                newdir,
                flags,
                name,
                newname,
            } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.rename(&ctx, newdir, name, newname, flags).await,
                );
            }
            Operation::Link { arg, name } => {
                match self.fs.link(&ctx, arg.oldnodeid, name).await {
                    Ok(entry) => reply.write_record_capped(
                        header.unique,
                        &entry,
                        fusebridge_proto::FuseEntryOut::serialized_size(minor),
                    ),
                    Err(errno) => reply.write_error(header.unique, errno),
                }
            }
            Operation::Open { arg } => match self.fs.open(&ctx, arg).await {
                Ok(open) => reply.write_record(header.unique, &open),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Read { arg } => match self.fs.read(&ctx, arg).await {
                Ok(mut data) => {
                    data.truncate(arg.size as usize);
                    reply.write_bytes(header.unique, &data);
                }
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Write { arg, data } => {
                if arg.size > negotiation.max_write {
                    tracing::warn!(
                        unique = header.unique,
                        size = arg.size,
                        max_write = negotiation.max_write,
                        "write exceeds negotiated limit"
                    );
                    reply.write_error(header.unique, Errno::EINVAL);
                } else {
                    match self.fs.write(&ctx, arg, data).await {
                        Ok(out) => reply.write_record(header.unique, &out),
                        Err(errno) => reply.write_error(header.unique, errno),
                    }
                }
            }
            Operation::Statfs => match self.fs.statfs(&ctx).await {
                Ok(st) => reply.write_record_capped(
                    header.unique,
                    &FuseStatfsOut { st },
                    FuseStatfsOut::serialized_size(minor),
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Release { arg } => {
                self.write_unit(&mut reply, header.unique, self.fs.release(&ctx, arg).await);
            }
            Operation::Fsync { arg } => {
                self.write_unit(&mut reply, header.unique, self.fs.fsync(&ctx, arg).await);
            }
            Operation::Setxattr { arg, name, value } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.setxattr(&ctx, arg, name, value).await,
                );
            }
            Operation::Getxattr { arg, name } => {
                let result = self.fs.getxattr(&ctx, arg, name).await;
                Self::write_xattr(&mut reply, header.unique, arg.size, result);
            }
            Operation::Listxattr { arg } => {
                let result = self.fs.listxattr(&ctx, arg).await;
                Self::write_xattr(&mut reply, header.unique, arg.size, result);
            }
            Operation::Removexattr { name } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.removexattr(&ctx, name).await,
                );
            }
            Operation::Flush { arg } => {
                self.write_unit(&mut reply, header.unique, self.fs.flush(&ctx, arg).await);
            }
            Operation::Init { .. } | Operation::CuseInit => {
                // The handshake is the session's business; seeing it here
                // means the kernel re-sent it on an active session.
                tracing::warn!(unique = header.unique, "handshake on active session");
                reply.write_error(header.unique, Errno::EIO);
            }
            Operation::Opendir { arg } => match self.fs.opendir(&ctx, arg).await {
                Ok(open) => reply.write_record(header.unique, &open),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Readdir { arg } => {
                let buf = DirentBuf::new((arg.size as usize).min(negotiation.buffer_size()));
                match self.fs.readdir(&ctx, arg, buf).await {
                    Ok(entries) => reply.write_bytes(header.unique, entries.as_bytes()),
                    Err(errno) => reply.write_error(header.unique, errno),
                }
            }
            Operation::Readdirplus { arg } => {
                let buf = DirentBuf::new((arg.size as usize).min(negotiation.buffer_size()));
                match self.fs.readdirplus(&ctx, arg, buf).await {
                    Ok(entries) => reply.write_bytes(header.unique, entries.as_bytes()),
                    Err(errno) => reply.write_error(header.unique, errno),
                }
            }
            Operation::Releasedir { arg } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.releasedir(&ctx, arg).await,
                );
            }
            Operation::Fsyncdir { arg } => {
                self.write_unit(&mut reply, header.unique, self.fs.fsyncdir(&ctx, arg).await);
            }
            Operation::Getlk { arg } => match self.fs.getlk(&ctx, arg).await {
                Ok(out) => reply.write_record(header.unique, &out),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Setlk { arg, sleep } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.setlk(&ctx, arg, sleep).await,
                );
            }
            Operation::Access { arg } => {
                self.write_unit(&mut reply, header.unique, self.fs.access(&ctx, arg).await);
            }
            Operation::Create { arg, name } => match self.fs.create(&ctx, arg, name).await {
                Ok(out) => reply.write_record_pair(
                    header.unique,
                    &out.entry,
                    fusebridge_proto::FuseEntryOut::serialized_size(minor),
                    &out.open,
                ),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Interrupt { arg } => {
                self.interrupt(arg.unique).await;
                return None;
            }
            Operation::Bmap { arg } => match self.fs.bmap(&ctx, arg).await {
                Ok(out) => reply.write_record(header.unique, &out),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Destroy => {
                self.fs.destroy(&ctx).await;
                reply.write_empty(header.unique);
            }
            Operation::Ioctl { arg, data } => match self.fs.ioctl(&ctx, arg, data).await {
                Ok(mut out) => {
                    out.data.truncate(arg.out_size as usize);
                    let record = FuseIoctlOut {
                        result: out.result,
                        ..FuseIoctlOut::default()
                    };
                    let mut message =
                        Vec::with_capacity(size_of::<FuseIoctlOut>() + out.data.len());
                    message.extend_from_slice(fusebridge_proto::bytes_of(&record));
                    message.extend_from_slice(&out.data);
                    reply.write_bytes(header.unique, &message);
                }
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::Poll { arg } => match self.fs.poll(&ctx, arg).await {
                Ok(out) => reply.write_record(header.unique, &out),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::NotifyReply => {
                tracing::debug!(unique = header.unique, "notify reply acknowledged");
                return None;
            }
            Operation::Fallocate { arg } => {
                self.write_unit(
                    &mut reply,
                    header.unique,
                    self.fs.fallocate(&ctx, arg).await,
                );
            }
            Operation::Lseek { arg } => match self.fs.lseek(&ctx, arg).await {
                Ok(out) => reply.write_record(header.unique, &out),
                Err(errno) => reply.write_error(header.unique, errno),
            },
            Operation::CopyFileRange { arg } => {
                match self.fs.copy_file_range(&ctx, arg).await {
                    Ok(out) => reply.write_record(header.unique, &out),
                    Err(errno) => reply.write_error(header.unique, errno),
                }
            }
        }

        Some(reply.finish())
    }

    #[allow(clippy::unused_self)]
    fn write_unit(&self, reply: &mut ReplyBuilder, unique: u64, result: Result<(), Errno>) {
        match result {
            Ok(()) => reply.write_empty(unique),
            Err(errno) => reply.write_error(unique, errno),
        }
    }

    /// Encodes the getxattr/listxattr two-phase protocol: a zero `size`
    /// asks only how large the value is, anything else wants the bytes and
    /// gets `ERANGE` if they no longer fit.
    fn write_xattr(
        reply: &mut ReplyBuilder,
        unique: u64,
        requested: u32,
        result: Result<XattrReply, Errno>,
    ) {
        match result {
            Ok(XattrReply::Size(size)) => {
                let out = FuseGetxattrOut {
                    size,
                    ..FuseGetxattrOut::default()
                };
                reply.write_record(unique, &out);
            }
            Ok(XattrReply::Data(data)) => {
                if requested == 0 {
                    let out = FuseGetxattrOut {
                        size: data.len() as u32,
                        ..FuseGetxattrOut::default()
                    };
                    reply.write_record(unique, &out);
                } else if data.len() > requested as usize {
                    reply.write_error(unique, Errno::ERANGE);
                } else {
                    reply.write_bytes(unique, &data);
                }
            }
            Err(errno) => reply.write_error(unique, errno),
        }
    }
}
