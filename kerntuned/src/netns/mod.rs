//! # Namespace Correlation Engine
//!
//! Maps opaque netns cookies (as carried by kernel events) to usable
//! namespace handles, and maintains each tuner's set of tracked namespaces.
//!
//! Cookies are read via `SO_NETNS_COOKIE` on a throwaway TCP socket created
//! *inside* the target namespace, which requires a namespace switch around
//! socket creation (see [`NetnsGuard`]).
//!
//! Namespace discovery scans two sources, deduplicating by cookie:
//! - `nsfs` entries in the live mount table (`/proc/mounts`)
//! - `ns/net` handles of every running process (`/proc/<pid>/ns/net`)
//!
//! If the kernel does not support `SO_NETNS_COOKIE`, every operation here
//! degrades to a defined no-op ("global scope" / not found). Callers must
//! treat that as expected, not exceptional.

pub mod switch;
pub mod tracking;

pub use switch::{NetnsGuard, NetnsHandle};
pub use tracking::NetnsSet;

use std::fs::File;
use std::io;
use std::mem;
use std::ops::ControlFlow;
use std::os::fd::AsRawFd;

use log::{debug, warn};

use crate::context::TuneContext;
use crate::domain::{NetnsCookie, TunerError};
use crate::registry::Registry;

/// `SO_NETNS_COOKIE`; defined locally because pre-5.14 libc headers lack it.
const SO_NETNS_COOKIE: libc::c_int = 71;

/// Read the netns cookie of the namespace the calling thread currently
/// occupies, via getsockopt on an ephemeral TCP socket.
///
/// # Errors
/// Returns the underlying OS error if the socket cannot be created or the
/// kernel does not support `SO_NETNS_COOKIE`.
#[allow(unsafe_code)]
pub fn current_cookie() -> Result<NetnsCookie, TunerError> {
    // SAFETY: plain FFI calls; the fd is closed on every path below.
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if sock < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let mut cookie: u64 = 0;
    let mut len = mem::size_of::<u64>() as libc::socklen_t;
    // SAFETY: cookie/len outlive the call and match the option's size.
    let ret = unsafe {
        libc::getsockopt(
            sock,
            libc::SOL_SOCKET,
            SO_NETNS_COOKIE,
            std::ptr::addr_of_mut!(cookie).cast(),
            &mut len,
        )
    };
    let err = io::Error::last_os_error();
    // SAFETY: sock is a valid fd we own.
    unsafe { libc::close(sock) };
    if ret < 0 {
        return Err(err.into());
    }
    Ok(NetnsCookie(cookie))
}

/// Probe whether this kernel exposes the netns correlation cookie.
///
/// A `false` result gates the whole engine into global-only mode.
#[must_use]
pub fn cookie_supported() -> bool {
    match current_cookie() {
        Ok(_) => true,
        Err(e) => {
            debug!("netns cookie not supported, cannot monitor per-netns events: {e}");
            false
        }
    }
}

/// Read the cookie of the namespace behind `ns`, switching into it for the
/// duration of the socket call.
///
/// # Errors
/// Fails if the namespace switch or the cookie read fails; the caller's
/// namespace is unchanged on error.
pub fn cookie_of(ns: &NetnsHandle) -> Result<NetnsCookie, TunerError> {
    let _guard = NetnsGuard::enter(ns)?;
    current_cookie()
}

/// Like [`cookie_of`] for an already-open namespace file, without giving
/// up ownership of it.
fn cookie_of_file(file: &File) -> Result<NetnsCookie, TunerError> {
    let _guard = NetnsGuard::enter_raw(file.as_raw_fd())?;
    current_cookie()
}

/// Walk every currently visible network namespace, invoking `visit` with
/// each distinct `(cookie, handle)` pair.
///
/// Phase one walks `nsfs` mounts; phase two walks `/proc/<pid>/ns/net`.
/// Entries that cannot be opened or resolved are skipped, not fatal.
fn scan_namespaces<F>(mut visit: F) -> Result<(), TunerError>
where
    F: FnMut(NetnsCookie, File) -> ControlFlow<()>,
{
    let mut seen: Vec<u64> = Vec::new();

    // Phase one: nsfs entries in the live mount table.
    let mounts = std::fs::read_to_string("/proc/mounts")?;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mountpoint), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if fstype != "nsfs" {
            continue;
        }
        debug!("checking nsfs mnt {mountpoint}");
        let Ok(file) = File::open(mountpoint) else { continue };
        let Ok(cookie) = cookie_of_file(&file) else { continue };
        if seen.contains(&cookie.0) {
            continue;
        }
        seen.push(cookie.0);
        if visit(cookie, file).is_break() {
            return Ok(());
        }
    }

    // Phase two: per-process namespace handles.
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.parse::<u32>().is_err() {
            continue;
        }
        let path = entry.path().join("ns/net");
        let Ok(file) = File::open(&path) else { continue };
        let Ok(cookie) = cookie_of_file(&file) else { continue };
        if seen.contains(&cookie.0) {
            continue;
        }
        seen.push(cookie.0);
        if visit(cookie, file).is_break() {
            return Ok(());
        }
    }
    Ok(())
}

/// Startup discovery: resolve the daemon's own (global) cookie, then give
/// every already-registered tuner a tracking entry for each distinct cookie
/// currently visible on the system.
///
/// A kernel without cookie support turns this into a no-op.
///
/// # Errors
/// Fails only on scan-level I/O errors (`/proc/mounts`, `/proc` unreadable);
/// individual namespaces that cannot be resolved are skipped.
pub fn init_all(ctx: &mut TuneContext, registry: &mut Registry) -> Result<(), TunerError> {
    ctx.netns_cookie_supported = cookie_supported();
    if !ctx.netns_cookie_supported {
        return Ok(());
    }
    match current_cookie() {
        Ok(cookie) => {
            ctx.global_netns_cookie = cookie;
            debug!("global netns cookie is {cookie}");
        }
        Err(e) => warn!("could not read global netns cookie: {e}"),
    }
    scan_namespaces(|cookie, _file| {
        for slot in registry.slots_mut() {
            slot.tuner.netns_add(cookie);
        }
        ControlFlow::Continue(())
    })
}

/// Resolve one specific cookie to a namespace handle.
///
/// Cookie 0, the global cookie, or a kernel without cookie support all
/// resolve to [`NetnsHandle::Global`]. Otherwise the two-phase scan runs
/// and returns as soon as a match is found.
///
/// # Errors
/// [`TunerError::CookieNotFound`] if no visible namespace carries `cookie`.
pub fn fd_from_cookie(ctx: &TuneContext, cookie: NetnsCookie) -> Result<NetnsHandle, TunerError> {
    if !ctx.netns_cookie_supported
        || cookie.is_global()
        || (!ctx.global_netns_cookie.is_global() && cookie == ctx.global_netns_cookie)
    {
        return Ok(NetnsHandle::Global);
    }
    let mut found: Option<File> = None;
    scan_namespaces(|c, file| {
        if c == cookie {
            debug!("found netns handle for cookie {c}");
            found = Some(file);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    found.map(NetnsHandle::Fd).ok_or(TunerError::CookieNotFound(cookie))
}

/// Open the namespace handle of a specific process, `/proc/<pid>/ns/net`.
///
/// Pid 0 means "the global namespace" and yields [`NetnsHandle::Global`].
///
/// # Errors
/// Propagates the open failure (process gone, permissions).
pub fn handle_from_pid(pid: u32) -> Result<NetnsHandle, TunerError> {
    if pid == 0 {
        return Ok(NetnsHandle::Global);
    }
    let path = format!("/proc/{pid}/ns/net");
    Ok(NetnsHandle::Fd(File::open(path)?))
}
