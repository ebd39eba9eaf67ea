//! Metadata documents and their physical store.
//!
//! A metadata document is an XML *record* listing references to other
//! archive objects. The engine only cares about those references (and the
//! record's own handle); everything else in a document passes through
//! untouched by staying on disk.

use minidom::Element;
use std::{fs, path::Path, str::FromStr};

use super::ServiceError;

pub const RECORD_NS: &str = "https://curator.dev/schema/record";

/// Parsed form of a metadata document, reduced to the parts the engine
/// reads and rewrites.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataDocument {
    /// The document's own persistent identifier, if it declares one.
    pub self_handle: Option<String>,
    /// Human-readable title.
    pub title: Option<String>,
    /// References to other objects, in document order.
    pub references: Vec<DocumentReference>,
}

/// A single reference found in a metadata document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentReference {
    /// Reference identifier: a handle, an archive reference, or a location
    /// string. Empty identifiers are represented as `None`.
    pub id: Option<String>,
    /// Location hint, usually a path relative to the document.
    pub location: Option<String>,
    /// Declared media type of the referenced object.
    pub mime: Option<String>,
}

impl MetadataDocument {
    /// Remove the document's own handle.
    pub fn clear_self_handle(&mut self) {
        self.self_handle = None;
    }
}

/// Parser/writer for metadata documents.
pub trait DocumentStore: Send + Sync {
    /// Parse the document at `location`.
    fn load(&self, location: &Path) -> Result<MetadataDocument, ServiceError>;

    /// Write `document` back to `location`.
    fn save(&self, document: &MetadataDocument, location: &Path)
        -> Result<(), ServiceError>;
}

/// The stock [`DocumentStore`], reading and writing record XML.
pub struct XmlDocumentStore;

impl DocumentStore for XmlDocumentStore {
    fn load(&self, location: &Path) -> Result<MetadataDocument, ServiceError> {
        let data = fs::read_to_string(location)?;
        let root = Element::from_str(&data)?;

        MetadataDocument::from_xml(&root)
            .map_err(|e| ServiceError(format!(
                "{}: {}", location.display(), e)))
    }

    fn save(&self, document: &MetadataDocument, location: &Path)
    -> Result<(), ServiceError> {
        let root = document.to_xml();
        let mut out = Vec::new();
        root.write_to(&mut out)
            .map_err(|e| ServiceError(e.to_string()))?;
        fs::write(location, &out)?;

        Ok(())
    }
}

#[derive(Debug, Fail)]
pub enum ParseRecordError {
    #[fail(display = "Missing required element {} from namespace {}", _1, _0)]
    MissingElement(&'static str, &'static str),
    #[fail(display = "Element {} was not expected in a record", _0)]
    InvalidElement(String),
}

impl MetadataDocument {
    pub fn from_xml(e: &Element) -> Result<MetadataDocument, ParseRecordError> {
        if !e.is("record", RECORD_NS) {
            return Err(ParseRecordError::MissingElement(RECORD_NS, "record"));
        }

        let self_handle = attr_nonempty(e, "handle");

        let title = e.get_child("title", RECORD_NS)
            .map(Element::text);

        let references = match e.get_child("resources", RECORD_NS) {
            Some(resources) => resources.children()
                .map(DocumentReference::from_xml)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(MetadataDocument { self_handle, title, references })
    }

    pub fn to_xml(&self) -> Element {
        let mut root = Element::builder("record").ns(RECORD_NS);

        if let Some(ref handle) = self.self_handle {
            root = root.attr("handle", handle.as_str());
        }

        let mut root = root.build();

        if let Some(ref title) = self.title {
            root.append_child(Element::builder("title")
                .ns(RECORD_NS)
                .append(title.as_str())
                .build());
        }

        let mut resources = Element::builder("resources").ns(RECORD_NS).build();

        for reference in &self.references {
            resources.append_child(reference.to_xml());
        }

        root.append_child(resources);

        root
    }
}

impl DocumentReference {
    fn from_xml(e: &Element) -> Result<DocumentReference, ParseRecordError> {
        if !e.is("resource", RECORD_NS) {
            return Err(ParseRecordError::InvalidElement(e.name().to_string()));
        }

        Ok(DocumentReference {
            id: attr_nonempty(e, "id"),
            location: attr_nonempty(e, "href"),
            mime: attr_nonempty(e, "type"),
        })
    }

    fn to_xml(&self) -> Element {
        let mut e = Element::builder("resource").ns(RECORD_NS);

        if let Some(ref id) = self.id {
            e = e.attr("id", id.as_str());
        }
        if let Some(ref location) = self.location {
            e = e.attr("href", location.as_str());
        }
        if let Some(ref mime) = self.mime {
            e = e.attr("type", mime.as_str());
        }

        e.build()
    }
}

fn attr_nonempty(e: &Element, name: &str) -> Option<String> {
    e.attr(name)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RECORD: &str = r#"<record xmlns="https://curator.dev/schema/record" handle="hdl:11142/rec-1">
        <title>Session one</title>
        <resources>
            <resource id="hdl:11142/res-1" href="./audio.wav" type="audio/x-wav"/>
            <resource href="notes.txt" type="text/plain"/>
        </resources>
    </record>"#;

    #[test]
    fn parse_record() {
        let root = Element::from_str(RECORD).unwrap();
        let doc = MetadataDocument::from_xml(&root).unwrap();

        assert_eq!(doc.self_handle.as_deref(), Some("hdl:11142/rec-1"));
        assert_eq!(doc.title.as_deref(), Some("Session one"));
        assert_eq!(doc.references.len(), 2);
        assert_eq!(doc.references[0].id.as_deref(), Some("hdl:11142/res-1"));
        assert_eq!(doc.references[1].id, None);
        assert_eq!(doc.references[1].location.as_deref(), Some("notes.txt"));
    }

    #[test]
    fn rewrite_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.xml");
        std::fs::write(&path, RECORD).unwrap();

        let store = XmlDocumentStore;
        let mut doc = store.load(&path).unwrap();

        doc.references[1].id = Some("hdl:11142/res-2".to_string());
        doc.clear_self_handle();
        store.save(&doc, &path).unwrap();

        let again = store.load(&path).unwrap();
        assert_eq!(again.self_handle, None);
        assert_eq!(again.references[1].id.as_deref(), Some("hdl:11142/res-2"));
        assert_eq!(again, doc);
    }
}
