use std::io;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::debug;

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Hide the backend's console window.
pub fn prepare_command(cmd: &mut Command) -> io::Result<()> {
    cmd.creation_flags(CREATE_NO_WINDOW);
    Ok(())
}

pub fn process_alive(pid: u32) -> bool {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system.process(sys_pid).is_some()
}

/// `taskkill /PID <pid> /T /F`: forced kill of the process and its children.
pub async fn tree_kill(pid: u32) -> io::Result<()> {
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .await?;

    if output.status.success() {
        debug!(pid, "taskkill terminated backend tree");
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "taskkill exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
