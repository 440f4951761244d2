//! Single byte-range resolution per RFC 7233.

/// Outcome of resolving an optional `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve the whole file with a 200.
    Full,
    /// Serve `start..=end` with a 206.
    Partial { start: u64, end: u64 },
    /// Answer 416.
    Unsatisfiable,
}

/// Resolve a request's `Range` header.
///
/// `bytes=a-b` takes both ends (end clamped to the file), `bytes=a-` runs to
/// the end, and `bytes=-n` means the last `n` bytes. A range covering the
/// whole file collapses to `Full`. Multi-ranges and anything unparseable are
/// unsatisfiable.
pub fn resolve(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(raw) = header else {
        return RangeOutcome::Full;
    };
    match parse(raw, size) {
        Some((0, end)) if end + 1 == size => RangeOutcome::Full,
        Some((start, end)) => RangeOutcome::Partial { start, end },
        None => RangeOutcome::Unsatisfiable,
    }
}

fn parse(raw: &str, size: u64) -> Option<(u64, u64)> {
    let spec = raw.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    if size == 0 {
        return None;
    }

    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        // Suffix range: the last N bytes.
        let suffix: u64 = end_s.trim().parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix), size - 1));
    }

    let start: u64 = start_s.trim().parse().ok()?;
    let end: u64 = if end_s.is_empty() {
        size - 1
    } else {
        end_s.trim().parse().ok()?
    };
    let end = end.min(size - 1);

    if start > end || start >= size {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_serves_full_file() {
        assert_eq!(resolve(None, 5000), RangeOutcome::Full);
    }

    #[test]
    fn basic_range() {
        assert_eq!(
            resolve(Some("bytes=0-999"), 5000),
            RangeOutcome::Partial { start: 0, end: 999 }
        );
    }

    #[test]
    fn open_ended_range() {
        assert_eq!(
            resolve(Some("bytes=1000-"), 5000),
            RangeOutcome::Partial {
                start: 1000,
                end: 4999
            }
        );
    }

    #[test]
    fn suffix_range() {
        assert_eq!(
            resolve(Some("bytes=-500"), 5000),
            RangeOutcome::Partial {
                start: 4500,
                end: 4999
            }
        );
    }

    #[test]
    fn suffix_larger_than_file_starts_at_zero() {
        assert_eq!(
            resolve(Some("bytes=-9999"), 5000),
            RangeOutcome::Full
        );
    }

    #[test]
    fn end_clamped_to_size() {
        assert_eq!(
            resolve(Some("bytes=10-99999"), 5000),
            RangeOutcome::Partial {
                start: 10,
                end: 4999
            }
        );
    }

    #[test]
    fn whole_file_range_collapses_to_full() {
        assert_eq!(resolve(Some("bytes=0-4999"), 5000), RangeOutcome::Full);
        assert_eq!(resolve(Some("bytes=0-"), 5000), RangeOutcome::Full);
    }

    #[test]
    fn start_beyond_size_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=5000-"), 5000), RangeOutcome::Unsatisfiable);
        assert_eq!(
            resolve(Some("bytes=6000-7000"), 5000),
            RangeOutcome::Unsatisfiable
        );
    }

    #[test]
    fn inverted_range_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=9-2"), 5000), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn multi_range_unsatisfiable() {
        assert_eq!(
            resolve(Some("bytes=0-100, 200-300"), 5000),
            RangeOutcome::Unsatisfiable
        );
    }

    #[test]
    fn garbage_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=a-b"), 5000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve(Some("items=0-1"), 5000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve(Some("bytes=-"), 5000), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve(Some("bytes=-0"), 5000), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn empty_file_any_range_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=0-"), 0), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve(None, 0), RangeOutcome::Full);
    }
}
