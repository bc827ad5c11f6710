use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::io;
use tokio::process::Command;
use tracing::debug;

/// Put the backend in its own process group and, on Linux, make it die with us.
///
/// The own group keeps terminal Ctrl-C away from the backend (the shell
/// decides when it stops) and lets us signal helpers the backend forks.
pub fn prepare_command(cmd: &mut Command) -> io::Result<()> {
    unsafe {
        cmd.pre_exec(|| {
            if set_process_group() != 0 {
                return Err(io::Error::last_os_error());
            }

            #[cfg(target_os = "linux")]
            {
                if set_parent_death_signal() != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            Ok(())
        });
    }

    Ok(())
}

/// Check if process is alive.
///
/// Signal 0 probes without delivering anything; EPERM means it exists but
/// belongs to someone else.
pub fn process_alive(pid: u32) -> bool {
    match kill(to_pid(pid), None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}

/// SIGTERM to the process group, or the process alone if it has no group.
pub fn send_graceful(pid: u32) -> io::Result<()> {
    signal_group(pid, Signal::SIGTERM)
}

/// SIGKILL to the process group, or the process alone if it has no group.
pub fn send_kill(pid: u32) -> io::Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    match killpg(to_pid(pid), signal) {
        Ok(()) => {
            debug!(pid, ?signal, "signalled backend process group");
            Ok(())
        }
        Err(Errno::ESRCH) | Err(Errno::EPERM) => {
            kill(to_pid(pid), signal).map_err(io::Error::from)?;
            debug!(pid, ?signal, "signalled backend process");
            Ok(())
        }
        Err(errno) => Err(io::Error::from(errno)),
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as libc::pid_t)
}

/// Encapsulates unsafe setpgid call
unsafe fn set_process_group() -> libc::c_int {
    unsafe { libc::setpgid(0, 0) }
}

/// Encapsulates unsafe prctl call
#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> libc::c_int {
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pid_is_not_alive() {
        // pid_max on Linux tops out at 2^22
        assert!(!process_alive(4_194_304 + 17));
    }

    #[test]
    fn signalling_a_missing_process_fails() {
        let err = send_graceful(4_194_304 + 17).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }
}
