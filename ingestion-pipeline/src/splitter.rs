//! Turns a fetched file into an ordered list of text chunks.
//!
//! The loader is chosen by file extension; anything unrecognized is
//! treated as plain text with lossy UTF-8 decoding.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use common::error::AppError;
use text_splitter::{Characters, ChunkConfig, MarkdownSplitter, TextSplitter};

/// One split chunk: its text and the metadata that participates in its
/// content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitChunk {
    pub content: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Split the file at `path` into ordered chunks sized in characters.
pub fn split_file(
    path: &Path,
    file_name: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<SplitChunk>, AppError> {
    if chunk_overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
        )));
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let chunks = match extension.as_str() {
        "pdf" => {
            let text = pdf_extract::extract_text(path)
                .map_err(|e| AppError::Split(format!("failed to extract pdf text: {e}")))?;
            split_plain(&text, chunk_size, chunk_overlap)?
        }
        "docx" => {
            let text = extract_docx_text(path)?;
            split_plain(&text, chunk_size, chunk_overlap)?
        }
        "md" | "markdown" => {
            let text = read_lossy(path)?;
            split_markdown(&text, chunk_size, chunk_overlap)?
        }
        _ => {
            let text = read_lossy(path)?;
            split_plain(&text, chunk_size, chunk_overlap)?
        }
    };

    Ok(chunks
        .into_iter()
        .map(|content| SplitChunk {
            content,
            metadata: BTreeMap::from([(
                "source".to_string(),
                serde_json::Value::String(file_name.to_owned()),
            )]),
        })
        .collect())
}

fn read_lossy(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn chunk_config(
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<ChunkConfig<Characters>, AppError> {
    ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|e| AppError::Validation(format!("invalid chunk configuration: {e}")))
}

fn split_plain(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, AppError> {
    let splitter = TextSplitter::new(chunk_config(chunk_size, chunk_overlap)?);
    Ok(splitter.chunks(text).map(str::to_owned).collect())
}

fn split_markdown(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, AppError> {
    let splitter = MarkdownSplitter::new(chunk_config(chunk_size, chunk_overlap)?);
    Ok(splitter.chunks(text).map(str::to_owned).collect())
}

/// Pull the visible text out of a DOCX file.
///
/// A DOCX is a zip archive; the body lives in `word/document.xml` with
/// text inside `<w:t>` runs and paragraphs delimited by `<w:p>`.
fn extract_docx_text(path: &Path) -> Result<String, AppError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Split(format!("not a readable docx archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::Split(format!("docx has no document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| AppError::Split(format!("failed to read docx body: {e}")))?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) if e.name().as_ref() == b"w:t" => {
                in_text_run = true;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                let run = t
                    .unescape()
                    .map_err(|e| AppError::Split(format!("malformed docx text run: {e}")))?;
                text.push_str(&run);
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AppError::Split(format!("malformed docx xml: {e}")));
            }
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_scratch(name: &str, contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("write scratch");
        (dir, path)
    }

    #[test]
    fn plain_text_splits_into_ordered_chunks() {
        let body = "alpha ".repeat(200);
        let (_dir, path) = write_scratch("notes.txt", body.as_bytes());

        let chunks = split_file(&path, "notes.txt", 100, 20).expect("split");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 100);
            assert_eq!(
                chunk.metadata.get("source"),
                Some(&serde_json::Value::String("notes.txt".into()))
            );
        }
    }

    #[test]
    fn unknown_extension_defaults_to_plain_text() {
        let (_dir, path) = write_scratch("data.unknown", b"short body");
        let chunks = split_file(&path, "data.unknown", 100, 0).expect("split");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks.first().map(|c| c.content.as_str()), Some("short body"));
    }

    #[test]
    fn markdown_uses_the_markdown_splitter() {
        let body = "# Title\n\nFirst paragraph.\n\n## Section\n\nSecond paragraph.";
        let (_dir, path) = write_scratch("doc.md", body.as_bytes());

        let chunks = split_file(&path, "doc.md", 30, 0).expect("split");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().any(|c| c.content.contains("# Title")));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let (_dir, path) = write_scratch("notes.txt", b"body");
        let err = split_file(&path, "notes.txt", 100, 100).expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn docx_text_is_extracted_from_the_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memo.docx");

        let document_xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>Hello docx</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;

        let file = std::fs::File::create(&path).expect("create docx");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("word/document.xml", options)
            .expect("start entry");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write entry");
        writer.finish().expect("finish zip");

        let chunks = split_file(&path, "memo.docx", 200, 0).expect("split");
        let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(combined.contains("Hello docx"));
        assert!(combined.contains("Second paragraph"));
    }

    #[test]
    fn corrupt_docx_is_a_split_error() {
        let (_dir, path) = write_scratch("broken.docx", b"definitely not a zip");
        let err = split_file(&path, "broken.docx", 100, 0).expect_err("must fail");
        assert!(matches!(err, AppError::Split(_)));
    }
}
