//! Local implementations of the collaborator traits.
//!
//! These back the development mode of the server and the engine's tests,
//! the same way a logging mail transport stands in for a real one. State
//! lives in memory; content stays on the local filesystem.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}},
};
use uuid::Uuid;

use crate::config::Config;
use super::{
    ArchiveCatalog, ArchiveObject, CrawlState, CrawlerService, HandleService,
    SearchIndex, ServiceError, Services,
    documents::XmlDocumentStore,
    typecheck::SniffingTypeChecker,
};

/// Build a complete local collaborator set from configuration.
pub fn suite(config: &Config) -> Services {
    Services {
        catalog: Arc::new(LocalCatalog::new()),
        documents: Arc::new(XmlDocumentStore),
        checker: Arc::new(SniffingTypeChecker::new(&config.typecheck)),
        handles: Arc::new(LocalHandles::new("11142")),
        crawler: Arc::new(LocalCrawler::new()),
        search: Arc::new(LocalSearch::new(&config.typecheck.metadata_mime)),
    }
}

/// In-memory archive catalog.
pub struct LocalCatalog {
    objects: Mutex<HashMap<String, ArchiveObject>>,
    next_id: Mutex<u32>,
}

impl LocalCatalog {
    pub fn new() -> LocalCatalog {
        LocalCatalog {
            objects: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Seed the catalog with an object.
    pub fn insert(&self, object: ArchiveObject) {
        self.objects.lock().unwrap()
            .insert(object.reference.clone(), object);
    }
}

impl ArchiveCatalog for LocalCatalog {
    fn resolve(&self, reference: &str) -> Result<Option<ArchiveObject>, ServiceError> {
        Ok(self.objects.lock().unwrap().get(reference).cloned())
    }

    fn by_handle(&self, handle: &str) -> Result<Option<ArchiveObject>, ServiceError> {
        let objects = self.objects.lock().unwrap();

        Ok(objects.values()
            .find(|o| o.pid.as_ref().map_or(false, |pid| {
                strip_scheme(pid) == strip_scheme(handle)
            }))
            .cloned())
    }

    fn register(&self, parent: &str, location: &Path, mime: &str)
    -> Result<String, ServiceError> {
        let mut next_id = self.next_id.lock().unwrap();
        let reference = format!("obj-{}", *next_id);
        *next_id += 1;

        let size = fs::metadata(location).map(|m| m.len()).unwrap_or(0);

        self.objects.lock().unwrap().insert(reference.clone(), ArchiveObject {
            reference: reference.clone(),
            location: location.to_path_buf(),
            size,
            on_site: true,
            mime: Some(mime.to_string()),
            pid: None,
            parents: vec![parent.to_string()],
        });

        Ok(reference)
    }

    fn relocate(&self, reference: &str, location: &Path) -> Result<(), ServiceError> {
        let mut objects = self.objects.lock().unwrap();

        match objects.get_mut(reference) {
            Some(object) => {
                object.location = location.to_path_buf();
                Ok(())
            }
            None => Err(ServiceError(format!(
                "Unknown archive reference: {}", reference))),
        }
    }
}

/// In-memory handle service with a fixed prefix.
pub struct LocalHandles {
    prefix: String,
    targets: Mutex<HashMap<String, String>>,
}

impl LocalHandles {
    pub fn new(prefix: &str) -> LocalHandles {
        LocalHandles {
            prefix: prefix.to_string(),
            targets: Mutex::new(HashMap::new()),
        }
    }
}

fn strip_scheme(handle: &str) -> &str {
    let handle = handle.trim();

    if handle.starts_with("hdl:") {
        &handle[4..]
    } else {
        handle
    }
}

impl HandleService for LocalHandles {
    fn mint(&self, target: &str) -> Result<String, ServiceError> {
        let handle = format!("hdl:{}/{}", self.prefix, Uuid::new_v4());
        self.targets.lock().unwrap()
            .insert(strip_scheme(&handle).to_string(), target.to_string());

        Ok(handle)
    }

    fn repoint(&self, handle: &str, target: &str) -> Result<(), ServiceError> {
        self.targets.lock().unwrap()
            .insert(strip_scheme(handle).to_string(), target.to_string());

        Ok(())
    }

    fn delete(&self, handle: &str) -> Result<(), ServiceError> {
        self.targets.lock().unwrap().remove(strip_scheme(handle));

        Ok(())
    }

    fn is_handle(&self, text: &str) -> bool {
        let text = strip_scheme(text);

        match text.find('/') {
            Some(slash) if slash > 0 => text[..slash]
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.'),
            _ => false,
        }
    }

    fn is_ours(&self, handle: &str) -> bool {
        let handle = strip_scheme(handle);

        handle.starts_with(&self.prefix)
            && handle[self.prefix.len()..].starts_with('/')
    }

    fn equivalent(&self, a: &str, b: &str) -> bool {
        strip_scheme(a).eq_ignore_ascii_case(strip_scheme(b))
    }
}

/// In-memory crawler which reports whatever state tests assign, and records
/// every version-creation batch.
pub struct LocalCrawler {
    invocations: Mutex<HashMap<String, CrawlState>>,
    default_state: Mutex<CrawlState>,
    versions: Mutex<Vec<Vec<(String, String)>>>,
    fail_versions: AtomicBool,
}

impl LocalCrawler {
    pub fn new() -> LocalCrawler {
        LocalCrawler {
            invocations: Mutex::new(HashMap::new()),
            default_state: Mutex::new(CrawlState::Success),
            versions: Mutex::new(Vec::new()),
            fail_versions: AtomicBool::new(false),
        }
    }

    /// State assigned to future invocations.
    pub fn set_default_state(&self, state: CrawlState) {
        *self.default_state.lock().unwrap() = state;
    }

    /// Override the state of an existing invocation.
    pub fn set_state(&self, invocation: &str, state: CrawlState) {
        self.invocations.lock().unwrap()
            .insert(invocation.to_string(), state);
    }

    /// Make [`CrawlerService::create_versions`] fail.
    pub fn fail_versions(&self, fail: bool) {
        self.fail_versions.store(fail, Ordering::Relaxed);
    }

    /// All version batches recorded so far.
    pub fn version_batches(&self) -> Vec<Vec<(String, String)>> {
        self.versions.lock().unwrap().clone()
    }
}

impl CrawlerService for LocalCrawler {
    fn invoke(&self, _reference: &str) -> Result<String, ServiceError> {
        let invocation = Uuid::new_v4().to_string();
        let state = self.default_state.lock().unwrap().clone();
        self.invocations.lock().unwrap().insert(invocation.clone(), state);

        Ok(invocation)
    }

    fn state(&self, invocation: &str) -> Result<CrawlState, ServiceError> {
        self.invocations.lock().unwrap()
            .get(invocation)
            .cloned()
            .ok_or_else(|| ServiceError(format!(
                "Unknown crawler invocation: {}", invocation)))
    }

    fn create_versions(&self, pairs: &[(String, String)])
    -> Result<(), ServiceError> {
        if self.fail_versions.load(Ordering::Relaxed) {
            return Err(ServiceError::new("Version creation failed"));
        }

        self.versions.lock().unwrap().push(pairs.to_vec());

        Ok(())
    }
}

/// In-memory search index.
pub struct LocalSearch {
    metadata_mime: String,
    entries: Mutex<HashSet<String>>,
}

impl LocalSearch {
    pub fn new(metadata_mime: &str) -> LocalSearch {
        LocalSearch {
            metadata_mime: metadata_mime.to_string(),
            entries: Mutex::new(HashSet::new()),
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.lock().unwrap().contains(reference)
    }
}

impl SearchIndex for LocalSearch {
    fn add(&self, reference: &str, _location: &Path) -> Result<(), ServiceError> {
        self.entries.lock().unwrap().insert(reference.to_string());

        Ok(())
    }

    fn remove(&self, reference: &str) -> Result<(), ServiceError> {
        self.entries.lock().unwrap().remove(reference);

        Ok(())
    }

    fn searchable(&self, mime: &str) -> bool {
        mime == self.metadata_mime || mime.starts_with("text/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn seeded_objects_resolve_and_follow_relocations() {
        let catalog = LocalCatalog::new();
        catalog.insert(ArchiveObject {
            reference: "obj-1".to_string(),
            location: PathBuf::from("/archive/music/a.wav"),
            size: 10,
            on_site: true,
            mime: Some("audio/x-wav".to_string()),
            pid: Some("hdl:11142/abc".to_string()),
            parents: Vec::new(),
        });

        let object = catalog.resolve("obj-1").unwrap().unwrap();
        assert_eq!(object.location, PathBuf::from("/archive/music/a.wav"));
        assert!(catalog.resolve("obj-2").unwrap().is_none());

        let object = catalog.by_handle("11142/abc").unwrap().unwrap();
        assert_eq!(object.reference, "obj-1");

        catalog.relocate("obj-1", Path::new("/trash/2026-08/a.wav")).unwrap();
        let object = catalog.resolve("obj-1").unwrap().unwrap();
        assert_eq!(object.location, PathBuf::from("/trash/2026-08/a.wav"));

        assert!(catalog.relocate("obj-2", Path::new("/x")).is_err());
    }

    #[test]
    fn the_search_index_tracks_added_and_removed_references() {
        let search = LocalSearch::new("application/x-record+xml");

        assert!(search.searchable("application/x-record+xml"));
        assert!(search.searchable("text/plain"));
        assert!(!search.searchable("audio/x-wav"));

        search.add("obj-1", Path::new("/archive/a.xml")).unwrap();
        assert!(search.contains("obj-1"));

        search.remove("obj-1").unwrap();
        assert!(!search.contains("obj-1"));
    }

    #[test]
    fn handle_classification() {
        let handles = LocalHandles::new("11142");

        assert!(handles.is_handle("hdl:11142/abc"));
        assert!(handles.is_handle("10.5/xyz"));
        assert!(!handles.is_handle("./child.txt"));
        assert!(!handles.is_handle("https://example.com/x"));

        assert!(handles.is_ours("hdl:11142/abc"));
        assert!(!handles.is_ours("hdl:99999/abc"));

        assert!(handles.equivalent("hdl:11142/ABC", "11142/abc"));
        assert!(!handles.equivalent("hdl:11142/abc", "11142/def"));
    }
}
