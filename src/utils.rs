/// Keep only names made of letters, digits, `_` and `-`; anything else becomes `random`.
pub fn sanitize_source_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let safe = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if safe {
        trimmed.to_string()
    } else {
        "random".to_string()
    }
}

/// Round the exact binary value to `decimals` places; exact ties go to the even digit.
pub fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

/// Split a user-supplied option string into argv tokens. No shell quoting is interpreted.
pub fn split_tokens(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(target_family = "unix")]
pub fn available_cores() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

#[cfg(not(target_family = "unix"))]
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
