use std::process::Command;

/// Read `MachineGuid` from the registry.
pub fn get_machine_id() -> Option<String> {
    let output = Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;

    let result = String::from_utf8_lossy(&output.stdout);

    // "    MachineGuid    REG_SZ    8f2c...": the value is the last column.
    result
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
        .filter(|value| value != "MachineGuid")
}
