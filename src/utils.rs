//! Small helpers shared across the handle and map modules.

use std::path::PathBuf;

use rand::Rng;
use rand::distributions::Alphanumeric;

/// A random string of `len` alphanumeric characters, suitable for use as a
/// filename component.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// The system page size. Never changes for the lifetime of the process.
pub fn page_size() -> usize {
    page_size::get()
}

/// Round `x` up to the next multiple of the system page size.
pub fn round_up_to_page_size(x: u64) -> u64 {
    let pg = page_size() as u64;
    x.checked_add(pg - 1).map_or(u64::MAX & !(pg - 1), |v| v & !(pg - 1))
}

/// Round `x` down to a multiple of the system page size.
pub fn round_down_to_page_size(x: u64) -> u64 {
    x & !(page_size() as u64 - 1)
}

/// The directory the platform declares suitable for temporary files.
///
/// Honours `TMPDIR` (POSIX) and `TMP`/`TEMP` (Windows) via the standard
/// library's resolution.
pub fn temp_directory() -> PathBuf {
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_strings_are_distinct() {
        let a = random_string(32);
        let b = random_string(32);
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn page_rounding() {
        let pg = page_size() as u64;
        assert_eq!(round_up_to_page_size(0), 0);
        assert_eq!(round_up_to_page_size(1), pg);
        assert_eq!(round_up_to_page_size(pg), pg);
        assert_eq!(round_up_to_page_size(pg + 1), 2 * pg);
        assert_eq!(round_down_to_page_size(pg + 1), pg);
        assert_eq!(round_down_to_page_size(pg - 1), 0);
    }
}
