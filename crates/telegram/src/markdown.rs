//! Notification text to Telegram HTML.
//!
//! Messages produced by the scheduler are plain text with two bits of
//! markup: `` `job_name` `` spans and the occasional `**bold**`. Everything
//! else, including job output, is escaped verbatim.

/// Telegram message size limit.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Raw text budget per message. Leaves room for the header line and for
/// entities that grow when escaped.
pub const MESSAGE_CHUNK_LEN: usize = 3500;

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape `text` and turn paired backticks into `<code>` and paired `**`
/// into `<b>`. Unpaired markers are kept literally.
pub fn render_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_line(line, &mut out);
    }
    out
}

fn render_line(line: &str, out: &mut String) {
    let mut rest = line;
    while !rest.is_empty() {
        let code = rest.find('`');
        let bold = rest.find("**");
        let (start, marker, open, close) = match (code, bold) {
            (Some(c), Some(b)) if b < c => (b, "**", "<b>", "</b>"),
            (Some(c), _) => (c, "`", "<code>", "</code>"),
            (None, Some(b)) => (b, "**", "<b>", "</b>"),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker).filter(|&end| end > 0) else {
            out.push_str(&escape_html(&rest[..start + marker.len()]));
            rest = after;
            continue;
        };

        out.push_str(&escape_html(&rest[..start]));
        out.push_str(open);
        out.push_str(&escape_html(&after[..end]));
        out.push_str(close);
        rest = &after[end + marker.len()..];
    }
    out.push_str(&escape_html(rest));
}

/// Split `text` into pieces of at most `max_len` bytes, preferring to break
/// at a newline, then at a space.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window = remaining.floor_char_boundary(max_len);
        if window == 0 {
            window = remaining
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(remaining.len());
        }

        let slice = &remaining[..window];
        let split_at = match slice.rfind('\n').or_else(|| slice.rfind(' ')) {
            Some(0) | None => window,
            Some(at) => at,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
        remaining = remaining.strip_prefix(' ').unwrap_or(remaining);
    }
    chunks
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("Starting: `backup`", "Starting: <code>backup</code>")]
    #[case("**3** jobs failed", "<b>3</b> jobs failed")]
    #[case("exit <1> & done", "exit &lt;1&gt; &amp; done")]
    #[case("`a<b>`", "<code>a&lt;b&gt;</code>")]
    #[case("unpaired ` tick", "unpaired ` tick")]
    #[case("empty `` pair", "empty `` pair")]
    #[case("glob **/*.rs", "glob **/*.rs")]
    #[case("`x` and **y** and `z`", "<code>x</code> and <b>y</b> and <code>z</code>")]
    fn render_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(render_html(input), expected);
    }

    #[test]
    fn markers_do_not_span_lines() {
        assert_eq!(render_html("a `b\nc` d"), "a `b\nc` d");
    }

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn chunks_prefer_newlines() {
        let text = "line one\nline two\nline three";
        let chunks = chunk_message(text, 18);
        assert_eq!(chunks, vec!["line one\nline two", "line three"]);
    }

    #[test]
    fn chunks_fall_back_to_spaces_then_hard_split() {
        assert_eq!(chunk_message("aaaa bbbb", 6), vec!["aaaa", "bbbb"]);
        assert_eq!(chunk_message("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let text = "ééééé";
        let chunks = chunk_message(text, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn zero_limit_yields_nothing() {
        assert!(chunk_message("abc", 0).is_empty());
    }
}
