use sysinfo::{ProcessExt, System, SystemExt};

/// Memory used by this process in bytes: the larger of the current resident
/// size reported by sysinfo and, on Linux, the `VmHWM` peak.
pub fn peak_memory_usage() -> Option<u64> {
    let current = current_memory_usage();
    let peak = high_water_mark();
    match (current, peak) {
        (Some(c), Some(p)) => Some(c.max(p)),
        (c, p) => c.or(p),
    }
}

fn current_memory_usage() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        log::debug!("Could not sample memory for process {}", pid);
        return None;
    }
    sys.process(pid).map(|process| process.memory())
}

fn high_water_mark() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_hwm(&status)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(any(target_os = "linux", test)), allow(dead_code))]
fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let mut parts = line["VmHWM:".len()..].split_whitespace();
    let amount: u64 = parts.next()?.parse().ok()?;
    let multiplier = match parts.next().map(|u| u.to_ascii_lowercase()) {
        Some(unit) if unit == "kb" => 1024,
        Some(unit) if unit == "mb" => 1024 * 1024,
        Some(unit) if unit == "gb" => 1024 * 1024 * 1024,
        _ => 1,
    };
    Some(amount * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kilobytes() {
        let status = "Name:\ttest\nVmPeak:\t  20000 kB\nVmHWM:\t    1536 kB\nVmRSS:\t 1000 kB\n";
        assert_eq!(parse_vm_hwm(status), Some(1536 * 1024));
    }

    #[test]
    fn missing_line_is_none() {
        assert_eq!(parse_vm_hwm("Name:\ttest\n"), None);
    }

    #[test]
    fn samples_own_process() {
        assert!(current_memory_usage().unwrap_or(0) > 0);
        assert!(peak_memory_usage().unwrap_or(0) > 0);
    }
}
