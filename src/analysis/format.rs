// src/analysis/format.rs

//! Text formatting for file log lines.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Render a byte count as e.g. `512 B`, `1.50 KB`, `3.00 GB`.
pub fn readable_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Group digits by thousands: `1234567` -> `1,234,567`.
pub fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Speed as shown in logs, e.g. `1,024 KB/s`.
pub fn speed_text(kb_per_sec: u64) -> String {
    format!("{} KB/s", thousands(kb_per_sec))
}

/// Progress as shown in logs, e.g. `40%`.
pub fn progress_text(progress: u8) -> String {
    format!("{progress}%")
}

/// Paths ending in a separator denote directories.
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}
