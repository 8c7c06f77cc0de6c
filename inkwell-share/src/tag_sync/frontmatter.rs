//! Reading and rewriting the `tags:` key of a document header.

/// Reads and writes tag names in a document's structured header.
pub trait TagHeaderCodec: Send + Sync {
    /// Tag names as written, in document order. Empty when there is no
    /// header or no tags key.
    fn read_tags(&self, document: &str) -> Vec<String>;

    /// Returns the document with its tags replaced by `tags`. Everything
    /// else in the document is kept as is.
    fn write_tags(&self, document: &str, tags: &[String]) -> String;
}

const DELIMITER: &str = "---";
const TAGS_KEY: &str = "tags:";

/// Codec for a `---`-delimited header at the top of the document.
///
/// Accepts `tags: [a, b]`, `tags: a, b` and a block list of `- a` lines.
/// Always writes the inline form.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrontmatterCodec;

/// Line span of the header body, excluding both delimiters.
struct Header {
    body_start: usize,
    body_end: usize,
}

fn find_header(lines: &[&str]) -> Option<Header> {
    if lines.first()?.trim_end() != DELIMITER {
        return None;
    }
    let close = lines[1..]
        .iter()
        .position(|line| line.trim_end() == DELIMITER)?;
    Some(Header {
        body_start: 1,
        body_end: close + 1,
    })
}

/// Span of the tags key within the header: the key line plus any block
/// list lines under it.
fn find_tags_key(lines: &[&str], header: &Header) -> Option<(usize, usize)> {
    let start = (header.body_start..header.body_end).find(|&i| lines[i].starts_with(TAGS_KEY))?;
    let mut end = start + 1;
    while end < header.body_end && is_list_item(lines[end]) {
        end += 1;
    }
    Some((start, end))
}

fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed == "-" || trimmed.starts_with("- ")
}

/// Strips one layer of quotes. Double quotes honor backslash escapes and
/// single quotes honor a doubled `''`.
fn unquote(value: &str) -> String {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        return out.trim().to_string();
    }
    if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        return inner.replace("''", "'").trim().to_string();
    }
    value.to_string()
}

/// Splits on commas outside quotes.
fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            escaped = false;
            current.push(c);
            continue;
        }
        match (quote, c) {
            (None, ',') => items.push(std::mem::take(&mut current)),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (Some('"'), '\\') => {
                escaped = true;
                current.push(c);
            }
            (Some(q), _) if q == c => {
                quote = None;
                current.push(c);
            }
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| unquote(item))
        .filter(|v| !v.is_empty())
        .collect()
}

fn render_tag(tag: &str) -> String {
    if tag.contains([',', '[', ']', '"', '\'', '#', ':', '\\']) {
        format!("\"{}\"", tag.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        tag.to_string()
    }
}

fn render_tags_line(tags: &[String]) -> String {
    let rendered: Vec<String> = tags.iter().map(|t| render_tag(t)).collect();
    format!("{TAGS_KEY} [{}]", rendered.join(", "))
}

impl TagHeaderCodec for FrontmatterCodec {
    fn read_tags(&self, document: &str) -> Vec<String> {
        let lines: Vec<&str> = document.lines().collect();
        let Some(header) = find_header(&lines) else {
            return Vec::new();
        };
        let Some((start, end)) = find_tags_key(&lines, &header) else {
            return Vec::new();
        };

        let value = lines[start][TAGS_KEY.len()..].trim();
        if let Some(inline) = value.strip_prefix('[') {
            return split_list(inline.strip_suffix(']').unwrap_or(inline));
        }
        if !value.is_empty() {
            return split_list(value);
        }
        lines[start + 1..end]
            .iter()
            .map(|line| unquote(line.trim_start().trim_start_matches('-')))
            .filter(|v| !v.is_empty())
            .collect()
    }

    fn write_tags(&self, document: &str, tags: &[String]) -> String {
        let tags_line = render_tags_line(tags);
        let newline = if document.contains("\r\n") { "\r\n" } else { "\n" };
        let lines: Vec<&str> = document.lines().collect();

        let Some(header) = find_header(&lines) else {
            return format!("{DELIMITER}{newline}{tags_line}{newline}{DELIMITER}{newline}{document}");
        };

        let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
        match find_tags_key(&lines, &header) {
            Some((start, end)) => {
                out.extend_from_slice(&lines[..start]);
                out.push(&tags_line);
                out.extend_from_slice(&lines[end..]);
            }
            None => {
                out.extend_from_slice(&lines[..header.body_end]);
                out.push(&tags_line);
                out.extend_from_slice(&lines[header.body_end..]);
            }
        }

        let mut rewritten = out.join(newline);
        if document.ends_with('\n') {
            rewritten.push_str(newline);
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_inline_list() {
        let doc = "---\ntitle: Day one\ntags: [Work, \"Deep Focus\"]\n---\nbody\n";
        assert_eq!(FrontmatterCodec.read_tags(doc), tags(&["Work", "Deep Focus"]));
    }

    #[test]
    fn reads_scalar_list() {
        let doc = "---\ntags: work, life\n---\n";
        assert_eq!(FrontmatterCodec.read_tags(doc), tags(&["work", "life"]));
    }

    #[test]
    fn reads_block_list() {
        let doc = "---\ntags:\n  - work\n  - 'travel'\nmood: good\n---\nbody";
        assert_eq!(FrontmatterCodec.read_tags(doc), tags(&["work", "travel"]));
    }

    #[test]
    fn no_header_means_no_tags() {
        assert!(FrontmatterCodec.read_tags("just text\ntags: [nope]").is_empty());
        assert!(FrontmatterCodec.read_tags("---\ntags: [open]\nno closing").is_empty());
        assert!(FrontmatterCodec.read_tags("").is_empty());
    }

    #[test]
    fn rewrite_replaces_block_list_and_keeps_other_fields() {
        let doc = "---\ntitle: Day one\ntags:\n  - work\nmood: good\n---\nbody\n";
        let out = FrontmatterCodec.write_tags(doc, &tags(&["work", "travel"]));
        assert_eq!(
            out,
            "---\ntitle: Day one\ntags: [work, travel]\nmood: good\n---\nbody\n"
        );
    }

    #[test]
    fn rewrite_adds_key_to_existing_header() {
        let doc = "---\ntitle: Day one\n---\nbody";
        let out = FrontmatterCodec.write_tags(doc, &tags(&["work"]));
        assert_eq!(out, "---\ntitle: Day one\ntags: [work]\n---\nbody");
    }

    #[test]
    fn rewrite_inserts_header_when_absent() {
        let out = FrontmatterCodec.write_tags("body\n", &tags(&["work"]));
        assert_eq!(out, "---\ntags: [work]\n---\nbody\n");
        assert_eq!(FrontmatterCodec.read_tags(&out), tags(&["work"]));
    }

    #[test]
    fn awkward_names_survive_a_rewrite() {
        let names = tags(&["a, b", "c:d", "say \"hi\"", "it's", r"back\slash", "C#"]);
        let out = FrontmatterCodec.write_tags("", &names);
        assert_eq!(FrontmatterCodec.read_tags(&out), names);
    }

    #[test]
    fn quoted_values_unescape() {
        let doc = "---\ntags: [\"a \\\"b\\\"\", 'it''s', \"x, y\"]\n---\n";
        assert_eq!(
            FrontmatterCodec.read_tags(doc),
            tags(&["a \"b\"", "it's", "x, y"])
        );
    }

    #[test]
    fn crlf_documents_stay_crlf() {
        let doc = "---\r\ntitle: Day one\r\ntags: [work]\r\n---\r\nbody\r\n";
        let out = FrontmatterCodec.write_tags(doc, &tags(&["work", "travel"]));
        assert_eq!(
            out,
            "---\r\ntitle: Day one\r\ntags: [work, travel]\r\n---\r\nbody\r\n"
        );
        assert_eq!(FrontmatterCodec.read_tags(&out), tags(&["work", "travel"]));

        let inserted = FrontmatterCodec.write_tags("line one\r\nline two\r\n", &tags(&["a"]));
        assert_eq!(inserted, "---\r\ntags: [a]\r\n---\r\nline one\r\nline two\r\n");
        assert!(!inserted.replace("\r\n", "").contains('\n'));
    }
}
