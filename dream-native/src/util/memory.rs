use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Resident memory of this process in bytes, 0 when the platform hides it.
pub fn process_memory_bytes() -> u64 {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(_) => return 0,
    };

    // Only our own entry: other processes are hidden on Android anyway.
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing().with_memory(),
    );
    sys.process(pid).map(|process| process.memory()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_memory_reported() {
        // Linux and macOS test hosts expose RSS for the current process.
        if cfg!(any(target_os = "linux", target_os = "macos")) {
            assert!(process_memory_bytes() > 0);
        }
    }
}
