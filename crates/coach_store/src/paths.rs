use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// Maps a conversation id onto a file-name-safe stem.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte is
/// percent-encoded, so distinct ids always get distinct file names.
#[must_use]
pub fn encode_id_for_filename(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[must_use]
pub fn transcript_file_name(conversation_id: &str) -> String {
    format!(
        "{}.{TRANSCRIPT_EXTENSION}",
        encode_id_for_filename(conversation_id)
    )
}

#[must_use]
pub fn transcript_path(root: &Path, conversation_id: &str) -> PathBuf {
    root.join(transcript_file_name(conversation_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_never_escape_the_root() {
        assert_eq!(transcript_file_name("../a/b"), "%2E%2E%2Fa%2Fb.jsonl");
        assert_eq!(
            transcript_path(Path::new("/data"), "c1"),
            PathBuf::from("/data/c1.jsonl")
        );
    }

    #[test]
    fn distinct_ids_never_share_a_file() {
        let ids = ["a.b", "a-b", "a b", "a:b", "a/b", "a%2Eb", "añb"];
        let names: std::collections::HashSet<String> =
            ids.iter().map(|id| transcript_file_name(id)).collect();
        assert_eq!(names.len(), ids.len());
        assert_eq!(encode_id_for_filename("3f9a_c-1"), "3f9a_c-1");
        assert_eq!(encode_id_for_filename("añb"), "a%C3%B1b");
    }
}
