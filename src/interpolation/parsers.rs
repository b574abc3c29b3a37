pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// A `:name` bind starts here unless it is part of a `::` cast.
pub(super) fn is_bind_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b':')
        && (idx == 0 || bytes[idx - 1] != b':')
        && bytes.get(idx + 1) != Some(&b':')
}
