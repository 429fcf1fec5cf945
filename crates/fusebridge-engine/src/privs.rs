//! Process credential management around the privileged mount boundary.
//!
//! A setuid mount helper runs handler code on behalf of an unprivileged
//! user. Outside the few syscalls that genuinely need elevated rights, the
//! process runs with the caller's effective IDs; the saved IDs keep the
//! elevated ones so a short [`PrivilegeGuard`] window can take them back.
//!
//! Both directions are deliberately permissive about processes that never
//! had elevated rights: dropping when not elevated, or restoring when
//! nothing was saved, is a no-op rather than an error.

use crate::error::PrivilegeError;

// -1 as an ID argument means "leave unchanged".
const KEEP_UID: libc::uid_t = libc::uid_t::MAX;
const KEEP_GID: libc::gid_t = libc::gid_t::MAX;

/// Drops effective credentials to the real user.
///
/// Group first, while the effective UID still permits it. The previous
/// effective IDs land in the saved IDs so [`restore_privs`] can recover
/// them. Verifies each change took effect; a set*id call that silently
/// fails must not let handler code keep running elevated.
pub fn drop_privs() -> Result<(), PrivilegeError> {
    if unsafe { libc::getegid() } == 0 {
        let new_gid = unsafe { libc::getgid() };
        let old_egid = unsafe { libc::getegid() };
        if unsafe { libc::setresgid(KEEP_GID, new_gid, old_egid) } < 0 {
            return Err(PrivilegeError::Drop {
                what: "group",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::getegid() } != new_gid {
            return Err(PrivilegeError::Ineffective { what: "group" });
        }
    }

    if unsafe { libc::geteuid() } == 0 {
        let new_uid = unsafe { libc::getuid() };
        let old_euid = unsafe { libc::geteuid() };
        if unsafe { libc::setresuid(KEEP_UID, new_uid, old_euid) } < 0 {
            return Err(PrivilegeError::Drop {
                what: "user",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::geteuid() } != new_uid {
            return Err(PrivilegeError::Ineffective { what: "user" });
        }
    }

    Ok(())
}

/// Restores the effective credentials saved by [`drop_privs`].
///
/// User first, the reverse of the drop order. A process whose effective
/// IDs are already elevated is left alone.
pub fn restore_privs() -> Result<(), PrivilegeError> {
    if unsafe { libc::geteuid() } != 0 {
        let mut ruid: libc::uid_t = 0;
        let mut euid: libc::uid_t = 0;
        let mut suid: libc::uid_t = 0;
        if unsafe { libc::getresuid(&mut ruid, &mut euid, &mut suid) } < 0 {
            return Err(PrivilegeError::Restore {
                what: "user",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::setresuid(KEEP_UID, suid, KEEP_UID) } < 0 {
            return Err(PrivilegeError::Restore {
                what: "user",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::geteuid() } != suid {
            return Err(PrivilegeError::Ineffective { what: "user" });
        }
    }

    if unsafe { libc::getegid() } != 0 {
        let mut rgid: libc::gid_t = 0;
        let mut egid: libc::gid_t = 0;
        let mut sgid: libc::gid_t = 0;
        if unsafe { libc::getresgid(&mut rgid, &mut egid, &mut sgid) } < 0 {
            return Err(PrivilegeError::Restore {
                what: "group",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::setresgid(KEEP_GID, sgid, KEEP_GID) } < 0 {
            return Err(PrivilegeError::Restore {
                what: "group",
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::getegid() } != sgid {
            return Err(PrivilegeError::Ineffective { what: "group" });
        }
    }

    Ok(())
}

/// Scoped window of restored privileges.
///
/// Acquire around the one syscall that needs elevated rights; dropping the
/// guard drops them again. Prefer [`release`](Self::release) where a
/// failed re-drop must abort the caller, since `Drop` can only log it.
#[derive(Debug)]
pub struct PrivilegeGuard {
    released: bool,
}

impl PrivilegeGuard {
    /// Restores saved credentials for the lifetime of the guard.
    pub fn acquire() -> Result<Self, PrivilegeError> {
        restore_privs()?;
        Ok(Self { released: false })
    }

    /// Explicitly drops privileges again, surfacing any failure.
    pub fn release(mut self) -> Result<(), PrivilegeError> {
        self.released = true;
        drop_privs()
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = drop_privs() {
            tracing::error!(error = %err, "failed to re-drop privileges");
        }
    }
}
