//! Text extraction for the book formats the scanner accepts.
//!
//! Plain text and Markdown are decoded as (lossy) UTF-8; PDF goes through
//! `pdf-extract`; DOCX and EPUB are ZIP containers whose XML parts are read
//! with `quick-xml`. Extraction never panics: failures come back as
//! [`ExtractError`] and the scanner turns them into per-file scan errors.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_EPUB: &str = "application/epub+zip";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements after which a paragraph break is emitted in XHTML content.
const BLOCK_ELEMENTS: &[&[u8]] = &[
    b"p", b"div", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"li", b"blockquote", b"section",
    b"tr",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("EPUB extraction failed: {0}")]
    Epub(String),
}

/// MIME type for a supported file extension (case-insensitive).
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "epub" => Some(MIME_EPUB),
        _ => None,
    }
}

/// Extract plain UTF-8 text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_EPUB => extract_epub(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(archive: &mut Archive<'_>, index: usize) -> Result<(String, Vec<u8>), String> {
    let entry = archive.by_index(index).map_err(|e| e.to_string())?;
    let name = entry.name().to_string();
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        ));
    }
    Ok((name, out))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Docx(e.to_string()))?;
    let index = archive
        .index_for_name("word/document.xml")
        .ok_or_else(|| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let (_, xml) = read_zip_entry_bounded(&mut archive, index).map_err(ExtractError::Docx)?;
    docx_paragraphs(&xml).map_err(ExtractError::Docx)
}

/// Text of every `w:t` run, with a paragraph break after each `w:p`.
fn docx_paragraphs(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => match te.unescape() {
                Ok(s) => out.push_str(&s),
                Err(_) => out.push_str(&String::from_utf8_lossy(&te)),
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => push_break(&mut out),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn extract_epub(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Epub(e.to_string()))?;
    let mut out = String::new();
    for index in 0..archive.len() {
        let (name, xml) = read_zip_entry_bounded(&mut archive, index).map_err(ExtractError::Epub)?;
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".html") || lower.ends_with(".xhtml") || lower.ends_with(".htm")) {
            continue;
        }
        let text = xhtml_text(&xml).map_err(|e| ExtractError::Epub(format!("{}: {}", name, e)))?;
        if !text.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&text);
        }
    }
    Ok(out)
}

/// Visible text of an (X)HTML document, skipping `head`, `script`, and `style`.
fn xhtml_text(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut hidden_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if matches!(e.local_name().as_ref(), b"head" | b"script" | b"style") {
                    hidden_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"head" | b"script" | b"style") {
                    hidden_depth = hidden_depth.saturating_sub(1);
                } else if BLOCK_ELEMENTS.contains(&name.as_ref()) {
                    push_break(&mut out);
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => out.push('\n'),
            Ok(Event::Text(te)) if hidden_depth == 0 => {
                let text = match te.unescape() {
                    Ok(s) => s.into_owned(),
                    Err(_) => String::from_utf8_lossy(&te).into_owned(),
                };
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !collapsed.is_empty() {
                    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                        out.push(' ');
                    }
                    out.push_str(&collapsed);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn push_break(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if !out.is_empty() {
        out.push_str("\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/Rome.TXT")), Some(MIME_TEXT));
        assert_eq!(content_type_for(Path::new("b.epub")), Some(MIME_EPUB));
        assert_eq!(content_type_for(Path::new("c.mobi")), None);
        assert_eq!(content_type_for(Path::new("noext")), None);
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error() {
        assert!(matches!(extract_text(b"not a zip", MIME_DOCX), Err(ExtractError::Docx(_))));
        assert!(matches!(extract_text(b"not a zip", MIME_EPUB), Err(ExtractError::Epub(_))));
    }

    #[test]
    fn plain_text_is_lossy_utf8() {
        let text = extract_text(b"Caesar \xff crossed", MIME_TEXT).unwrap();
        assert!(text.starts_with("Caesar "));
        assert!(text.ends_with(" crossed"));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>The Senate</w:t></w:r><w:r><w:t xml:space="preserve"> met.</w:t></w:r></w:p>
<w:p><w:r><w:t>Caesar &amp; Pompey quarrelled.</w:t></w:r></w:p>
</w:body></w:document>"#;
        let bytes = zip_of(&[("word/document.xml", xml)]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "The Senate met.\n\nCaesar & Pompey quarrelled.");
    }

    #[test]
    fn docx_without_document_xml_fails() {
        let bytes = zip_of(&[("word/other.xml", "<x/>")]);
        assert!(matches!(extract_text(&bytes, MIME_DOCX), Err(ExtractError::Docx(_))));
    }

    #[test]
    fn epub_reads_html_entries_in_archive_order() {
        let ch1 = r#"<html><head><title>Ignored</title><style>p{}</style></head>
<body><h1>Chapter One</h1><p>Rome was founded.</p></body></html>"#;
        let ch2 = r#"<html><body><p>The Republic fell.</p></body></html>"#;
        let bytes = zip_of(&[
            ("mimetype", "application/epub+zip"),
            ("OEBPS/ch1.xhtml", ch1),
            ("OEBPS/styles.css", "p { color: red }"),
            ("OEBPS/ch2.html", ch2),
        ]);
        let text = extract_text(&bytes, MIME_EPUB).unwrap();
        assert_eq!(text, "Chapter One\n\nRome was founded.\n\nThe Republic fell.");
    }
}
