use crate::danger::DangerLevel;

/// Substrings that always earn a warning, with the text shown to the user.
const BLACKLIST: &[(&str, &str)] = &[
    ("rm -rf", "recursive forced deletion"),
    ("rm -r", "recursive deletion"),
    ("rm -f", "forced deletion"),
    ("sudo ", "runs with elevated privileges"),
    ("dd if=", "raw disk copy"),
    ("mkfs", "formats a filesystem"),
    ("> /dev/", "writes directly to a device"),
    (">/dev/", "writes directly to a device"),
    ("chmod 777", "makes files world-writable"),
    ("chmod -r 777", "makes files world-writable"),
    ("chown -r", "recursive ownership change"),
    ("| sh", "pipes output into a shell"),
    ("| bash", "pipes output into a shell"),
    ("|sh", "pipes output into a shell"),
    ("|bash", "pipes output into a shell"),
    ("kill -9", "forceful process termination"),
    ("killall", "terminates processes by name"),
    ("shutdown", "shuts the system down"),
    ("reboot", "reboots the system"),
    (":(){", "fork bomb"),
    ("history -c", "clears shell history"),
    ("git push --force", "rewrites remote history"),
    ("git reset --hard", "discards local changes"),
    ("drop table", "drops a database table"),
    ("drop database", "drops a database"),
];

/// Fast substring scan used by providers to fill `Response.warnings`.
///
/// This is a cheap side-channel next to the danger engine, not a replacement
/// for it: it has no notion of context and never assigns a level.
pub fn scan_command(command: &str) -> Vec<String> {
    let lowered = command.to_lowercase();
    let mut warnings: Vec<String> = Vec::new();

    for (needle, what) in BLACKLIST {
        if lowered.contains(needle) {
            let warning = format!("Command {what} (`{}`)", needle.trim());
            if !warnings.iter().any(|w| w.starts_with(&format!("Command {what}"))) {
                warnings.push(warning);
            }
        }
    }

    warnings
}

/// Rough level implied by the scan, used only when a vendor gives no
/// self-assessment of its own.
pub fn implied_level(warnings: &[String]) -> DangerLevel {
    match warnings.len() {
        0 => DangerLevel::Safe,
        1 => DangerLevel::Low,
        _ => DangerLevel::Medium,
    }
}
