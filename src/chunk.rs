//! §4.4 Markdown Chunker: splits a document into `##`/`###`-delimited
//! sections outside fenced code blocks, capturing the first `#` line as
//! the document title. Pure — no I/O, never errors; a malformed document
//! just yields whatever chunks can be recovered.

use md5::{Digest, Md5};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownChunk {
    pub heading_text: Option<String>,
    pub document_title: String,
    pub start_line_in_doc: usize,
    pub content: String,
    pub content_hash: String,
}

struct RawSection {
    heading_text: Option<String>,
    start_line: usize,
    lines: Vec<String>,
}

/// `path` is used only as the title fallback when no `#` line is present.
pub fn chunk_markdown(path: &str, text: &str) -> Vec<MarkdownChunk> {
    let lines: Vec<&str> = text.lines().collect();

    let mut title: Option<String> = None;
    let mut sections: Vec<RawSection> = vec![RawSection { heading_text: None, start_line: 1, lines: Vec::new() }];
    let mut in_fence = false;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed_start = line.trim_start();

        if is_fence_delimiter(trimmed_start) {
            in_fence = !in_fence;
            sections.last_mut().unwrap().lines.push(line.to_string());
            continue;
        }

        if !in_fence {
            if title.is_none() {
                if let Some(h1) = heading_text(line, 1) {
                    title = Some(h1);
                    // The leading chunk begins after the H1 line itself.
                    sections.last_mut().unwrap().start_line = line_no + 1;
                    continue;
                }
            }

            if let Some(heading) = heading_text(line, 2).or_else(|| heading_text(line, 3)) {
                sections.push(RawSection { heading_text: Some(heading), start_line: line_no, lines: Vec::new() });
                continue;
            }
        }

        sections.last_mut().unwrap().lines.push(line.to_string());
    }

    let document_title = title.unwrap_or_else(|| basename(path));

    sections
        .into_iter()
        .filter_map(|section| {
            let content = section.lines.join("\n");
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(MarkdownChunk {
                heading_text: section.heading_text,
                document_title: document_title.clone(),
                start_line_in_doc: section.start_line,
                content: trimmed.to_string(),
                content_hash: content_hash(trimmed),
            })
        })
        .collect()
}

/// `chunk.id = originalDocumentPath#slug(heading)_startLine`; the leading
/// (heading-less) chunk slugs to `"_top"`.
pub fn chunk_id(document_path: &str, chunk: &MarkdownChunk) -> String {
    let slug = match &chunk.heading_text {
        Some(h) => slugify(h),
        None => "_top".to_string(),
    };
    format!("{document_path}#{slug}_{}", chunk.start_line_in_doc)
}

fn heading_text(line: &str, level: usize) -> Option<String> {
    let prefix = "#".repeat(level);
    let rest = line.strip_prefix(&prefix)?;
    // Must not be a deeper heading (e.g. `##` matching as a prefix of `###`).
    if rest.starts_with('#') {
        return None;
    }
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn is_fence_delimiter(trimmed_start: &str) -> bool {
    trimmed_start.starts_with("```") || trimmed_start.starts_with("~~~")
}

fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

pub fn content_hash(content: &str) -> String {
    let digest = Md5::digest(content.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_no_chunks() {
        assert!(chunk_markdown("docs/empty.md", "").is_empty());
    }

    #[test]
    fn h1_becomes_title_and_is_not_its_own_chunk() {
        let text = "# My Project\n\nSome intro text.\n\n## Usage\n\nHow to use it.";
        let chunks = chunk_markdown("docs/readme.md", text);
        assert_eq!(chunks[0].document_title, "My Project");
        assert!(chunks.iter().all(|c| c.document_title == "My Project"));
        assert!(chunks[0].content.contains("Some intro text."));
        assert_eq!(chunks[0].heading_text, None);
    }

    #[test]
    fn missing_h1_falls_back_to_filename() {
        let text = "## Usage\n\nDetails here.";
        let chunks = chunk_markdown("docs/usage.md", text);
        assert_eq!(chunks[0].document_title, "usage.md");
    }

    #[test]
    fn h2_and_h3_each_start_a_chunk() {
        let text = "# Title\n\n## Section A\n\nbody a\n\n### Subsection B\n\nbody b";
        let chunks = chunk_markdown("d.md", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_text.as_deref(), Some("Section A"));
        assert_eq!(chunks[1].heading_text.as_deref(), Some("Subsection B"));
    }

    #[test]
    fn headings_inside_fenced_code_are_ignored() {
        let text = "# Title\n\n## Real Section\n\n```\n## not a heading\n```\n\nmore text";
        let chunks = chunk_markdown("d.md", text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("not a heading"));
    }

    #[test]
    fn line_ranges_cover_every_non_heading_content_line_exactly_once() {
        let text = "# T\nintro1\nintro2\n## A\nbody1\nbody2\n## B\nbody3";
        let chunks = chunk_markdown("d.md", text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line_in_doc, 2);
        assert_eq!(chunks[1].start_line_in_doc, 4);
        assert_eq!(chunks[2].start_line_in_doc, 7);
    }

    #[test]
    fn chunk_id_uses_slug_and_start_line() {
        let text = "## My Heading!\n\ncontent";
        let chunks = chunk_markdown("docs/a.md", text);
        let id = chunk_id("docs/a.md", &chunks[0]);
        assert_eq!(id, "docs/a.md#my-heading_1");
    }

    #[test]
    fn deterministic_across_runs() {
        let text = "# T\n\n## A\n\nfoo\n\n## B\n\nbar";
        let a = chunk_markdown("d.md", text);
        let b = chunk_markdown("d.md", text);
        assert_eq!(a, b);
    }
}
