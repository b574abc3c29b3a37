#[derive(Clone, Copy)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Bracketed,
    LineComment,
    BlockComment(u32),
}

/// Scan an identifier (`[A-Za-z_][A-Za-z0-9_]*`) starting at `start`.
pub(super) fn scan_identifier(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    match bytes.get(start) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return None,
    }
    let mut idx = start + 1;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
        idx += 1;
    }
    std::str::from_utf8(&bytes[start..idx])
        .ok()
        .map(|name| (idx, name))
}
