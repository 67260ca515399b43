//! Device-status-report interception
//!
//! Some CLIs ask the terminal for the cursor position (`ESC [ 6n`) and then
//! block until a reply arrives. Nobody is watching a headless PTY, so every
//! query is stripped from the stream and answered on the spot.

use once_cell::sync::Lazy;
use regex::Regex;

/// Cursor position report sent back for each query: row 1, column 1
pub const CURSOR_POSITION_REPLY: &[u8] = b"\x1b[1;1R";

static DSR_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[\??6n").expect("DSR pattern is valid"));

/// Result of scanning one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsrScan {
    pub cleaned: String,
    pub queries: usize,
}

/// Remove every cursor-position query from `chunk` and count them
pub fn intercept_dsr(chunk: &str) -> DsrScan {
    let queries = DSR_QUERY.find_iter(chunk).count();
    if queries == 0 {
        return DsrScan {
            cleaned: chunk.to_string(),
            queries,
        };
    }

    DsrScan {
        cleaned: DSR_QUERY.replace_all(chunk, "").into_owned(),
        queries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chunk_untouched() {
        let scan = intercept_dsr("hello\r\nworld");
        assert_eq!(scan.cleaned, "hello\r\nworld");
        assert_eq!(scan.queries, 0);
    }

    #[test]
    fn test_query_anywhere_is_removed() {
        let scan = intercept_dsr("\x1b[6nstart mid\x1b[6ndle end\x1b[6n");
        assert_eq!(scan.cleaned, "start middle end");
        assert_eq!(scan.queries, 3);
    }

    #[test]
    fn test_private_mode_query() {
        let scan = intercept_dsr("a\x1b[?6nb");
        assert_eq!(scan.cleaned, "ab");
        assert_eq!(scan.queries, 1);
    }

    #[test]
    fn test_other_escapes_survive() {
        let scan = intercept_dsr("\x1b[31mred\x1b[0m\x1b[5n");
        assert_eq!(scan.cleaned, "\x1b[31mred\x1b[0m\x1b[5n");
        assert_eq!(scan.queries, 0);
    }
}
