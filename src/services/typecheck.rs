use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    fs,
    io::Read,
    path::Path,
};

use super::ServiceError;

/// How suitable a file is for long-term archiving.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Judgement {
    /// A well-understood format, safe to archive.
    Archivable,
    /// Usable, but only suitable for short-term retention.
    ShortTerm,
    /// Not acceptable for archiving.
    Unarchivable,
}

impl fmt::Display for Judgement {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            Judgement::Archivable => "archivable",
            Judgement::ShortTerm => "short-term",
            Judgement::Unarchivable => "unarchivable",
        })
    }
}

/// Result of a type check.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    /// Detected media type.
    pub mime: String,
    /// Suitability judgement.
    pub judgement: Judgement,
    /// Human-readable analysis of how the verdict was reached.
    pub analysis: String,
}

/// Content type checker.
pub trait TypeChecker: Send + Sync {
    /// Check a file's content against its declared filename. Never mutates
    /// the file.
    fn check(&self, content: &Path, filename: &str) -> Result<Verdict, ServiceError>;

    /// Does the archiving policy of `area` accept this judgement?
    fn accepts(&self, judgement: Judgement, area: &str) -> bool;
}

/// Stock [`TypeChecker`] detecting types from magic bytes and extensions.
pub struct SniffingTypeChecker {
    metadata_mime: String,
    accept: HashMap<String, Vec<Judgement>>,
}

/// How many bytes of a file the sniffer looks at.
const SNIFF_LEN: usize = 4096;

impl SniffingTypeChecker {
    pub fn new(config: &crate::config::Typecheck) -> Self {
        SniffingTypeChecker {
            metadata_mime: config.metadata_mime.clone(),
            accept: config.accept.clone(),
        }
    }

    /// Classify a chunk of content.
    pub fn sniff(&self, data: &[u8], filename: &str) -> Verdict {
        if let Some(verdict) = self.sniff_magic(data) {
            return verdict;
        }

        if data.iter().take(512).all(|&b| b != 0)
            && std::str::from_utf8(data).is_ok()
        {
            let mime = match extension(filename) {
                Some("xml") => mime::TEXT_XML.to_string(),
                Some("csv") => mime::TEXT_CSV.to_string(),
                _ => mime::TEXT_PLAIN.to_string(),
            };

            return Verdict {
                mime,
                judgement: Judgement::Archivable,
                analysis: "plain text content".to_string(),
            };
        }

        Verdict {
            mime: mime::APPLICATION_OCTET_STREAM.to_string(),
            judgement: Judgement::ShortTerm,
            analysis: format!("unrecognised binary content in {}", filename),
        }
    }

    fn sniff_magic(&self, data: &[u8]) -> Option<Verdict> {
        let (mime, judgement, analysis): (&str, _, &str) =
            if data.starts_with(b"<?xml") || data.starts_with(b"<record") {
                if is_record_document(data) {
                    (&self.metadata_mime, Judgement::Archivable,
                        "metadata record document")
                } else {
                    ("text/xml", Judgement::Archivable, "generic XML document")
                }
            } else if data.starts_with(b"%PDF-") {
                ("application/pdf", Judgement::Archivable, "PDF document")
            } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
                ("image/png", Judgement::Archivable, "PNG image")
            } else if data.starts_with(b"\xff\xd8\xff") {
                ("image/jpeg", Judgement::Archivable, "JPEG image")
            } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
                ("image/gif", Judgement::Archivable, "GIF image")
            } else if data.len() >= 12
                && data.starts_with(b"RIFF")
                && &data[8..12] == b"WAVE"
            {
                ("audio/x-wav", Judgement::Archivable, "WAVE audio")
            } else if data.starts_with(b"PK\x03\x04") {
                ("application/zip", Judgement::ShortTerm, "ZIP container")
            } else if data.starts_with(b"\x7fELF") || data.starts_with(b"MZ") {
                ("application/octet-stream", Judgement::Unarchivable,
                    "executable content")
            } else {
                return None;
            };

        Some(Verdict {
            mime: mime.to_string(),
            judgement,
            analysis: analysis.to_string(),
        })
    }
}

impl TypeChecker for SniffingTypeChecker {
    fn check(&self, content: &Path, filename: &str) -> Result<Verdict, ServiceError> {
        let mut data = Vec::with_capacity(SNIFF_LEN);
        fs::File::open(content)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut data)?;

        Ok(self.sniff(&data, filename))
    }

    fn accepts(&self, judgement: Judgement, area: &str) -> bool {
        let policy = self.accept.get(area)
            .or_else(|| self.accept.get("*"));

        match policy {
            Some(accepted) => accepted.contains(&judgement),
            // Without configured policy everything except outright rejects
            // is allowed in.
            None => judgement != Judgement::Unarchivable,
        }
    }
}

/// Is this XML a record document (root element `record` in the record
/// namespace)? Cheap textual test so the sniffer never fully parses.
fn is_record_document(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(text) => text.contains("<record")
            && text.contains(super::documents::RECORD_NS),
        Err(_) => false,
    }
}

fn extension(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> SniffingTypeChecker {
        SniffingTypeChecker::new(&crate::config::Typecheck::default())
    }

    #[test]
    fn sniffs_record_documents() {
        let data = format!(
            r#"<?xml version="1.0"?><record xmlns="{}"/>"#,
            crate::services::documents::RECORD_NS,
        );
        let verdict = checker().sniff(data.as_bytes(), "session.xml");

        assert_eq!(verdict.mime, "application/x-record+xml");
        assert_eq!(verdict.judgement, Judgement::Archivable);
    }

    #[test]
    fn sniffs_binary_formats() {
        let verdict = checker().sniff(b"%PDF-1.4 rest", "paper.pdf");
        assert_eq!(verdict.mime, "application/pdf");

        let verdict = checker().sniff(b"\x7fELF\x02\x01\x01", "a.out");
        assert_eq!(verdict.judgement, Judgement::Unarchivable);
    }

    #[test]
    fn sniffs_text() {
        let verdict = checker().sniff(b"hello transcription", "notes.txt");
        assert_eq!(verdict.mime, "text/plain");
        assert_eq!(verdict.judgement, Judgement::Archivable);
    }

    #[test]
    fn acceptability_follows_configured_policy() {
        let mut config = crate::config::Typecheck::default();
        config.accept.insert("*".to_string(), vec![Judgement::Archivable]);
        config.accept.insert("sandbox".to_string(),
            vec![Judgement::Archivable, Judgement::ShortTerm]);
        let checker = SniffingTypeChecker::new(&config);

        assert!(!checker.accepts(Judgement::ShortTerm, "corpora"));
        assert!(checker.accepts(Judgement::ShortTerm, "sandbox"));
        assert!(!checker.accepts(Judgement::Unarchivable, "sandbox"));
    }

    #[test]
    fn default_policy_rejects_only_unarchivable() {
        let checker = checker();

        assert!(checker.accepts(Judgement::Archivable, "anything"));
        assert!(checker.accepts(Judgement::ShortTerm, "anything"));
        assert!(!checker.accepts(Judgement::Unarchivable, "anything"));
    }
}
