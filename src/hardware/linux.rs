use std::fs;

const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Read the systemd/dbus machine id.
pub fn get_machine_id() -> Option<String> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}
