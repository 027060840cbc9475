//! Internal utilities.

/// Checks whether the process with the given PID is still alive.
///
/// Uses `kill(pid, 0)`, which checks existence without delivering a signal.
#[cfg(unix)]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: `kill(pid, 0)` is a standard POSIX existence check that does
    // not deliver any signal.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Checks whether the process with the given PID is still alive.
#[cfg(not(unix))]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

/// Compares process names the way the OS process list reports them:
/// case-insensitive, with an optional `.exe` suffix.
#[must_use]
pub fn process_name_matches(actual: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> &str {
        match name.len().checked_sub(4) {
            Some(cut) if cut > 0 && name.get(cut..).is_some_and(|s| s.eq_ignore_ascii_case(".exe")) => {
                &name[..cut]
            }
            _ => name,
        }
    }
    stem(actual).eq_ignore_ascii_case(stem(wanted))
}

/// Encodes `s` as a NUL-terminated UTF-16 string for wide OS APIs.
#[cfg(windows)]
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
