use crate::error::{Error, Result};
use std::fs::{self, DirBuilder};
use std::path::{Path, PathBuf};

/// File extensions read as documents. PDFs go through text extraction,
/// everything else is read as UTF-8 text.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "json", "html", "htm", "log", "xml", "yaml", "yml",
    "pdf",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub content: String,
}

/// Creates a directory if it doesn't exist
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    DirBuilder::new().recursive(true).create(path)?;
    Ok(())
}

/// Splits text into chunks of at most max_chars characters at sentence boundaries.
/// Sentences that do not fit are broken on words, and words on characters.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_length = 0;
    let mut separator = " ";

    for (sentence, sentence_separator) in sentences(text) {
        let pieces = fit_to_width(sentence, max_chars);
        let last = pieces.len() - 1;

        for (i, piece) in pieces.into_iter().enumerate() {
            let piece_len = piece.chars().count();
            if !current_chunk.is_empty() && current_length + 1 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current_chunk));
                current_length = 0;
            }

            if !current_chunk.is_empty() {
                current_chunk.push_str(separator);
                current_length += 1;
            }
            current_chunk.push_str(&piece);
            current_length += piece_len;
            separator = if i == last { sentence_separator } else { " " };
        }
    }

    if !current_chunk.is_empty() {
        chunks.push(current_chunk);
    }

    chunks
}

/// Sentences paired with the separator that followed them: `"\n"` when the
/// gap held a line break, `" "` otherwise. A `.`, `!` or `?` ends a sentence
/// only when followed by whitespace or the end of the text; a line break
/// always does.
fn sentences(text: &str) -> Vec<(&str, &'static str)> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\n' => i,
            '.' | '!' | '?' if chars.peek().map_or(true, |(_, next)| next.is_whitespace()) => {
                i + c.len_utf8()
            }
            _ => continue,
        };

        let mut separator = if c == '\n' { "\n" } else { " " };
        let mut resume = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            if next == '\n' {
                separator = "\n";
            }
            resume = j + next.len_utf8();
            chars.next();
        }

        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push((sentence, separator));
        }
        start = resume;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push((tail, " "));
    }
    sentences
}

fn fit_to_width(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_length = 0;

    for word in sentence.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for part in chars.chunks(max_chars) {
            if !current.is_empty() && current_length + 1 + part.len() > max_chars {
                pieces.push(std::mem::take(&mut current));
                current_length = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_length += 1;
            }
            current.extend(part.iter());
            current_length += part.len();
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn read_document(path: &Path) -> std::result::Result<String, String> {
    if is_pdf(path) {
        // pdf-extract panics on some malformed fonts instead of returning an error.
        std::panic::catch_unwind(|| pdf_extract::extract_text(path))
            .map_err(|_| "PDF text extraction panicked".to_string())?
            .map_err(|e| format!("failed to extract PDF text: {}", e))
    } else {
        fs::read_to_string(path).map_err(|e| e.to_string())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Loads all supported documents from a directory recursively, in path order.
///
/// Fails with an index build error when the folder is missing, unreadable, or
/// holds no readable document of a supported type.
pub fn load_documents(dir_path: impl AsRef<Path>) -> Result<Vec<SourceDocument>> {
    let dir_path = dir_path.as_ref();
    if !dir_path.is_dir() {
        return Err(Error::index_build(format!(
            "document folder {} does not exist",
            dir_path.display()
        )));
    }

    let mut documents = Vec::new();
    collect_documents(dir_path, &mut documents)?;

    if documents.is_empty() {
        return Err(Error::index_build(format!(
            "no supported documents in {} (expected one of: {})",
            dir_path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    Ok(documents)
}

fn collect_documents(dir_path: &Path, documents: &mut Vec<SourceDocument>) -> Result<()> {
    let entries = fs::read_dir(dir_path).map_err(|e| {
        Error::index_build(format!("cannot read {}: {}", dir_path.display(), e))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::index_build(format!("cannot read {}: {}", dir_path.display(), e))
        })?;
        paths.push(entry.path());
    }
    paths.sort();

    for path in paths {
        if is_hidden(&path) {
            continue;
        }

        if path.is_dir() {
            collect_documents(&path, documents)?;
        } else if path.is_file() && is_supported(&path) {
            match read_document(&path) {
                Ok(content) if content.trim().is_empty() => {
                    tracing::debug!("skipping empty document {}", path.display());
                }
                Ok(content) => documents.push(SourceDocument { path, content }),
                Err(e) => tracing::warn!("skipping unreadable document {}: {}", path.display(), e),
            }
        }
    }

    Ok(())
}
