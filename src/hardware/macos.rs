use std::process::Command;

/// Get the platform UUID on macOS.
///
/// Uses `ioreg -rd1 -c IOPlatformExpertDevice` and searches for `IOPlatformUUID`.
pub fn get_machine_id() -> Option<String> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;

    let result = String::from_utf8_lossy(&output.stdout);

    result
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('=').nth(1))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
