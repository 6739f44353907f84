//! Front matter splitting for markdown sources.

const DELIMITER: &str = "---";

/// Result of looking for a front matter block at the top of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split<'a> {
    /// No opening delimiter; the whole input is body.
    Body(&'a str),
    /// A closed block: (front matter, body).
    Block(&'a str, &'a str),
    /// An opening delimiter without a closing one.
    Unterminated,
}

/// Split a `---` delimited YAML block from the start of `content`.
///
/// Both delimiters must sit on their own line; `...` is accepted as the closing
/// delimiter as YAML allows.
pub fn split_front_matter(content: &str) -> Split<'_> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let Some(after_open) = content.strip_prefix(DELIMITER) else {
        return Split::Body(content);
    };
    let Some(rest) = after_open
        .strip_prefix("\r\n")
        .or_else(|| after_open.strip_prefix('\n'))
    else {
        return Split::Body(content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let bare = line.trim_end_matches(&['\n', '\r'][..]);
        if bare == DELIMITER || bare == "..." {
            return Split::Block(&rest[..offset], &rest[offset + line.len()..]);
        }
        offset += line.len();
    }

    Split::Unterminated
}
