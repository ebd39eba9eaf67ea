//! Processing files uploaded into a workspace.
//!
//! Uploaded files are staged, type-checked and recorded as nodes. Metadata
//! documents among them are then parsed and their references matched against
//! the workspace's nodes, creating links and rewriting reference identifiers
//! where needed. ZIP archives are expanded before processing.

use diesel::result::Error as DbError;
use failure::Fail;
use mime::Mime;
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use url::Url;
use zip::ZipArchive;

use crate::{
    Config,
    db::{
        Connection,
        models as db,
        types::{NodeKind, NodeStatus, WorkspaceStatus},
    },
    models::{ImportProblem, Workspace, WorkspaceNode},
    services::{HandleService, MetadataDocument, ServiceError, Services},
    utils,
};

/// Outcome of one upload batch.
#[derive(Debug)]
pub struct UploadReport {
    /// IDs of the nodes created from this batch.
    pub nodes: Vec<i32>,
    /// Recoverable problems found along the way.
    pub problems: Vec<ImportProblem>,
}

/// Stage a batch of files into a workspace and resolve metadata references.
///
/// Each file either becomes a node or contributes a problem; a single bad
/// file never fails the batch. Only infrastructure failures are fatal.
pub fn process_files(
    dbconn: &Connection,
    config: &Config,
    services: &Services,
    workspace: &mut Workspace,
    files: &[PathBuf],
) -> Result<UploadReport, UploadError> {
    match workspace.status {
        WorkspaceStatus::Initializing | WorkspaceStatus::Initialized => {}
        status => return Err(UploadError::NotEditable(status)),
    }

    let staging_dir = config.storage.workspace_dir(workspace.id);
    fs::create_dir_all(&staging_dir)?;

    let mut problems = Vec::new();
    let mut staged = Vec::new();

    for file in files {
        match stage_file(&staging_dir, file) {
            Ok(mut paths) => staged.append(&mut paths),
            Err(err) => {
                problems.push(ImportProblem::file(
                        file.to_string_lossy(), "could not be staged")
                    .caused_by(&err));
            }
        }
    }

    let mut nodes = Vec::new();
    let mut metadata = Vec::new();

    for staged_file in &staged {
        match create_uploaded_node(dbconn, config, services, workspace.id,
                staged_file, &mut problems) {
            Ok(node) => {
                if node.kind == NodeKind::Metadata {
                    metadata.push(node.clone());
                }
                nodes.push(node.into_db().id);
            }
            Err(err) => return Err(err),
        }
    }

    // Matching runs after the whole batch is staged so documents can refer
    // to resources uploaded alongside them, in either order.
    let candidates = WorkspaceNode::in_workspace(dbconn, workspace.id)?;

    for node in &metadata {
        resolve_document(dbconn, services, workspace, &candidates,
            node, &mut problems)?;
    }

    info!("Processed {} uploaded files into workspace {} \
           ({} nodes, {} problems)",
        files.len(), workspace.id, nodes.len(), problems.len());

    Ok(UploadReport { nodes, problems })
}

/// Copy one upload into the staging area, expanding ZIP archives.
fn stage_file(staging_dir: &Path, file: &Path)
-> Result<Vec<StagedFile>, UploadError> {
    let name = file.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::BadFileName(file.to_path_buf()))?;

    if file.extension().and_then(|e| e.to_str()) == Some("zip") {
        return unpack_zip(staging_dir, file);
    }

    let target = utils::next_available_name(staging_dir, name);
    fs::copy(file, &target)?;

    Ok(vec![StagedFile {
        location: target,
        origin: file.to_path_buf(),
    }])
}

/// Expand a ZIP upload into the staging area.
///
/// Directory structure inside the archive is flattened; directory entries
/// and empty files are skipped.
fn unpack_zip(staging_dir: &Path, file: &Path)
-> Result<Vec<StagedFile>, UploadError> {
    let mut zip = ZipArchive::new(fs::File::open(file)?)?;
    let mut staged = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;

        if entry.size() == 0 {
            continue;
        }

        let name = match Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
        {
            Some(name) => name,
            None => continue,
        };

        let target = utils::next_available_name(staging_dir, &name);
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        staged.push(StagedFile {
            location: target,
            origin: file.join(entry.name()),
        });
    }

    Ok(staged)
}

/// A file sitting in the staging area, remembering where it came from.
struct StagedFile {
    location: PathBuf,
    origin: PathBuf,
}

/// Type-check one staged file and record it as a node.
fn create_uploaded_node(
    dbconn: &Connection,
    config: &Config,
    services: &Services,
    workspace: i32,
    staged: &StagedFile,
    problems: &mut Vec<ImportProblem>,
) -> Result<WorkspaceNode, UploadError> {
    let name = staged.location.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::BadFileName(staged.location.clone()))?;

    let mut mime = None;
    let mut kind = NodeKind::Unknown;
    let mut archivable = true;

    match services.checker.check(&staged.location, name) {
        Ok(verdict) => {
            kind = if is_metadata_mime(&verdict.mime,
                    &config.typecheck.metadata_mime) {
                NodeKind::Metadata
            } else {
                NodeKind::Resource
            };

            // Uploads are not anywhere under the archive yet, so the
            // default acceptance policy applies.
            if !services.checker.accepts(verdict.judgement, "*") {
                problems.push(ImportProblem::file(name, format!(
                    "content judged {} is not accepted: {}",
                    verdict.judgement, verdict.analysis)));
                kind = NodeKind::Unknown;
                archivable = false;
            }

            mime = Some(verdict.mime);
        }
        Err(err) => {
            problems.push(ImportProblem::file(name,
                    "type check did not complete")
                .caused_by(&err));
        }
    }

    let node = WorkspaceNode::create(dbconn, &db::NewWorkspaceNode {
        workspace,
        archive_ref: None,
        archive_location: None,
        staging_location: staged.location.to_str(),
        origin_location: staged.origin.to_str(),
        name,
        kind,
        mime: mime.as_deref(),
        status: NodeStatus::Uploaded,
        pid: None,
        archivable,
    })?;

    Ok(node)
}

/// Compare a detected media type against the configured metadata type,
/// ignoring parameters.
fn is_metadata_mime(detected: &str, metadata_mime: &str) -> bool {
    match detected.parse::<Mime>() {
        Ok(mime) => mime.essence_str() == metadata_mime,
        Err(_) => detected == metadata_mime,
    }
}

/// Match one uploaded metadata document's references against workspace
/// nodes, linking and rewriting as needed.
fn resolve_document(
    dbconn: &Connection,
    services: &Services,
    workspace: &Workspace,
    candidates: &[WorkspaceNode],
    parent: &WorkspaceNode,
    problems: &mut Vec<ImportProblem>,
) -> Result<(), UploadError> {
    let staging = match parent.staging_location {
        Some(ref staging) => PathBuf::from(staging),
        None => return Ok(()),
    };

    let mut document = match services.documents.load(&staging) {
        Ok(document) => document,
        Err(err) => {
            problems.push(ImportProblem::file(parent.name.as_str(),
                    "metadata document could not be parsed")
                .caused_by(&err));
            return Ok(());
        }
    };
    let document = &mut document;

    let mut dirty = false;
    let parent_dir = staging.parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    for index in 0..document.references.len() {
        dirty |= resolve_reference(dbconn, services, workspace,
            candidates, parent, &parent_dir, document, index, problems)?;
    }

    // A document uploaded from another archive may carry that archive's
    // handle; it must not survive into ours.
    if let Some(ref handle) = document.self_handle {
        if !services.handles.is_ours(handle) {
            info!("Stripping foreign self-handle {} from {}",
                handle, parent.name);
            document.clear_self_handle();
            dirty = true;
        }
    }

    if dirty {
        services.documents.save(document, &staging)?;
    }

    Ok(())
}

/// Match a single reference. Returns whether the document was modified.
fn resolve_reference(
    dbconn: &Connection,
    services: &Services,
    workspace: &Workspace,
    candidates: &[WorkspaceNode],
    parent: &WorkspaceNode,
    parent_dir: &Path,
    document: &mut MetadataDocument,
    index: usize,
    problems: &mut Vec<ImportProblem>,
) -> Result<bool, UploadError> {
    let id = document.references[index].id.clone();
    let location = document.references[index].location.clone();

    let text = id.as_deref()
        .or(location.as_deref())
        .unwrap_or("")
        .to_string();

    // Pass 1: the location hint against staged and original paths.
    let mut matched = location.as_deref()
        .and_then(|loc| find_node_for_path(candidates, parent_dir, loc))
        .cloned();

    // Pass 2: the identifier, as a handle or an archive reference.
    if matched.is_none() {
        if let Some(ref id) = id {
            matched = match_identifier(dbconn, services, workspace, candidates,
                id)?;
        }
    }

    // Pass 3: the identifier as another location hint.
    if matched.is_none() {
        if let Some(ref id) = id {
            matched = find_node_for_path(candidates, parent_dir, id).cloned();
        }
    }

    // Remote references stay external and keep their URL as identifier.
    if matched.is_none() {
        if let Some(remote) = id.as_deref().filter(|id| is_remote_url(id)) {
            let node = create_remote_node(dbconn, workspace.id, remote)?;
            link_below(dbconn, parent, &node, &text, problems);
            return Ok(false);
        }
    }

    let mut node = match matched {
        Some(node) => node,
        None => {
            problems.push(ImportProblem::unmatched(parent.id, text,
                "no matching file in this workspace"));

            // A handle from a foreign archive must not survive unmatched.
            if let Some(ref id) = id {
                if services.handles.is_handle(id)
                    && !services.handles.is_ours(id)
                {
                    document.references[index].id = None;
                    return Ok(true);
                }
            }

            return Ok(false);
        }
    };

    if !link_below(dbconn, parent, &node, &text, problems) {
        return Ok(false);
    }

    // A reference carrying a real identifier wins over a stale one recorded
    // on the node, however the node was found.
    if let Some(id) = id.as_deref()
        .filter(|id| is_object_identifier(&*services.handles, id))
    {
        let equivalent = node.archive_ref.as_deref() == Some(id)
            || node.pid.as_deref()
                .map_or(false, |pid| services.handles.equivalent(pid, id));

        if !equivalent {
            node.set_archive_ref(dbconn, id)?;
        }

        return Ok(false);
    }

    // The identifier was empty or a location string; point it at the
    // node's canonical identifier.
    let canonical = node.pid.as_deref().or(node.archive_ref.as_deref());

    if let Some(canonical) = canonical {
        if id.as_deref() != Some(canonical) {
            document.references[index].id = Some(canonical.to_string());
            return Ok(true);
        }
    }

    Ok(false)
}

/// Link a matched node below the referencing document's node.
///
/// A child keeps its first parent; a later attempt is a logged no-op. Only a
/// database failure stops the caller, recorded as a problem.
fn link_below(
    dbconn: &Connection,
    parent: &WorkspaceNode,
    node: &WorkspaceNode,
    reference: &str,
    problems: &mut Vec<ImportProblem>,
) -> bool {
    match WorkspaceNode::link(dbconn, parent.id, node.id, reference) {
        Ok(true) => true,
        Ok(false) => {
            debug!("Node {} already has a parent, not linking below {}",
                node.id, parent.id);
            true
        }
        Err(err) => {
            problems.push(ImportProblem::link(parent.id, node.id,
                "could not record link", &err));
            false
        }
    }
}

/// Does an identifier name an object, as opposed to restating a file path
/// in the identifier field?
fn is_object_identifier(handles: &dyn HandleService, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }

    if handles.is_handle(id) || is_remote_url(id) {
        return true;
    }

    !(id.starts_with("./")
        || id.starts_with("../")
        || id.starts_with('/')
        || Path::new(id).extension().is_some())
}

/// Match an identifier against node handles, archive references, and
/// finally the archive catalog itself.
fn match_identifier(
    dbconn: &Connection,
    services: &Services,
    workspace: &Workspace,
    candidates: &[WorkspaceNode],
    id: &str,
) -> Result<Option<WorkspaceNode>, UploadError> {
    if services.handles.is_handle(id) {
        if let Some(node) = find_node_for_handle(&*services.handles,
                candidates, id) {
            return Ok(Some(node.clone()));
        }

        // A known handle not staged in this workspace enters as an
        // external leaf.
        if let Some(object) = services.catalog.by_handle(id)? {
            return create_external_node(dbconn, workspace.id, &object)
                .map(Some);
        }

        return Ok(None);
    }

    if let Some(node) = WorkspaceNode::by_archive_ref(dbconn, workspace.id,
            id)? {
        return Ok(Some(node));
    }

    Ok(None)
}

/// Find the candidate whose staged or original path matches a location hint.
///
/// The hint is tried verbatim first, then relative to the referencing
/// document's directory.
fn find_node_for_path<'a>(
    candidates: &'a [WorkspaceNode],
    parent_dir: &Path,
    location: &str,
) -> Option<&'a WorkspaceNode> {
    let trimmed = location.trim_start_matches("./");
    let resolved = parent_dir.join(trimmed);

    candidates.iter().find(|node| {
        let paths = node.staging_location.iter()
            .chain(node.origin_location.iter());

        for path in paths {
            let path = Path::new(path);
            if path == Path::new(location)
                || path == Path::new(trimmed)
                || path == resolved.as_path()
            {
                return true;
            }
        }

        false
    })
}

/// Find the candidate carrying a handle equivalent to `handle`.
fn find_node_for_handle<'a>(
    handles: &dyn HandleService,
    candidates: &'a [WorkspaceNode],
    handle: &str,
) -> Option<&'a WorkspaceNode> {
    candidates.iter().find(|node| {
        node.pid.as_deref()
            .map_or(false, |pid| handles.equivalent(pid, handle))
    })
}

/// Is this identifier a reference to something outside any archive?
fn is_remote_url(id: &str) -> bool {
    match Url::parse(id) {
        Ok(url) => matches!(url.scheme(), "http" | "https" | "ftp"),
        Err(_) => false,
    }
}

/// Record an external leaf for an archive object referenced but not staged.
fn create_external_node(
    dbconn: &Connection,
    workspace: i32,
    object: &crate::services::ArchiveObject,
) -> Result<WorkspaceNode, UploadError> {
    let name = object.location.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&object.reference)
        .to_string();

    WorkspaceNode::create(dbconn, &db::NewWorkspaceNode {
        workspace,
        archive_ref: Some(&object.reference),
        archive_location: object.location.to_str(),
        staging_location: None,
        origin_location: object.location.to_str(),
        name: &name,
        kind: NodeKind::Unknown,
        mime: object.mime.as_deref(),
        status: NodeStatus::External,
        pid: object.pid.as_deref(),
        archivable: false,
    }).map_err(UploadError::from)
}

/// Record an external leaf for a remote URL reference.
fn create_remote_node(dbconn: &Connection, workspace: i32, url: &str)
-> Result<WorkspaceNode, UploadError> {
    let name = url.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(url);

    WorkspaceNode::create(dbconn, &db::NewWorkspaceNode {
        workspace,
        archive_ref: None,
        archive_location: None,
        staging_location: None,
        origin_location: Some(url),
        name,
        kind: NodeKind::Unknown,
        mime: None,
        status: NodeStatus::External,
        pid: None,
        archivable: false,
    }).map_err(UploadError::from)
}

#[derive(Debug, Fail)]
pub enum UploadError {
    /// The workspace is past the editable part of its lifecycle.
    #[fail(display = "Workspace in status {} cannot take uploads", _0)]
    NotEditable(WorkspaceStatus),
    /// An upload's filename could not be interpreted.
    #[fail(display = "{:?} is not a usable file name", _0)]
    BadFileName(PathBuf),
    /// A ZIP upload could not be read.
    #[fail(display = "Broken ZIP archive: {}", _0)]
    Zip(#[cause] zip::result::ZipError),
    /// A collaborator failed.
    #[fail(display = "{}", _0)]
    Service(#[cause] ServiceError),
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// An operating system error.
    #[fail(display = "System error: {}", _0)]
    System(#[cause] io::Error),
}

impl_from! { for UploadError ;
    zip::result::ZipError => |e| UploadError::Zip(e),
    ServiceError => |e| UploadError::Service(e),
    DbError => |e| UploadError::Database(e),
    io::Error => |e| UploadError::System(e),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::types::{NodeKind, NodeStatus},
        services::local::LocalHandles,
    };

    fn node(
        id: i32,
        staging: Option<&str>,
        origin: Option<&str>,
        pid: Option<&str>,
    ) -> WorkspaceNode {
        WorkspaceNode::from_db(db::WorkspaceNode {
            id,
            workspace: 1,
            archive_ref: None,
            archive_location: None,
            staging_location: staging.map(str::to_string),
            origin_location: origin.map(str::to_string),
            name: "file".to_string(),
            kind: NodeKind::Resource,
            mime: None,
            status: NodeStatus::Uploaded,
            pid: pid.map(str::to_string),
            archivable: true,
        })
    }

    #[test]
    fn path_matching_prefers_exact_locations() {
        let candidates = vec![
            node(1, Some("/ws/5/audio.wav"), None, None),
            node(2, Some("/ws/5/notes.txt"), None, None),
        ];

        let found = find_node_for_path(
            &candidates, Path::new("/ws/5"), "/ws/5/notes.txt");
        assert_eq!(found.map(|n| n.id), Some(2));
    }

    #[test]
    fn path_matching_resolves_relative_hints() {
        let candidates = vec![
            node(1, Some("/ws/5/audio.wav"), None, None),
        ];

        let found = find_node_for_path(
            &candidates, Path::new("/ws/5"), "./audio.wav");
        assert_eq!(found.map(|n| n.id), Some(1));

        let found = find_node_for_path(
            &candidates, Path::new("/ws/5"), "audio.wav");
        assert_eq!(found.map(|n| n.id), Some(1));
    }

    #[test]
    fn path_matching_falls_back_to_origin_locations() {
        let candidates = vec![
            node(1, Some("/ws/5/audio-1.wav"), Some("/home/u/audio.wav"), None),
        ];

        let found = find_node_for_path(
            &candidates, Path::new("/ws/5"), "/home/u/audio.wav");
        assert_eq!(found.map(|n| n.id), Some(1));
    }

    #[test]
    fn path_matching_is_deterministic() {
        let candidates = vec![
            node(1, Some("/ws/5/a.txt"), None, None),
            node(2, Some("/ws/5/a.txt"), None, None),
        ];

        // First candidate in node-ID order wins when paths collide.
        let found = find_node_for_path(
            &candidates, Path::new("/ws/5"), "a.txt");
        assert_eq!(found.map(|n| n.id), Some(1));
    }

    #[test]
    fn handle_matching_ignores_syntax_differences() {
        let handles = LocalHandles::new("11142");
        let candidates = vec![
            node(1, None, None, Some("hdl:11142/abc")),
            node(2, None, None, Some("hdl:11142/def")),
        ];

        let found = find_node_for_handle(&handles, &candidates, "11142/DEF");
        assert_eq!(found.map(|n| n.id), Some(2));

        assert!(find_node_for_handle(&handles, &candidates, "11142/xyz")
            .is_none());
    }

    #[test]
    fn object_identifiers_are_told_apart_from_path_hints() {
        let handles = LocalHandles::new("11142");

        // Handles, archive references and URLs name objects; a matching
        // node's record is reconciled to them.
        assert!(is_object_identifier(&handles, "hdl:11142/abc"));
        assert!(is_object_identifier(&handles, "obj-17"));
        assert!(is_object_identifier(&handles, "https://example.org/a.wav"));

        // Empty and path-shaped identifiers are rewritten to the node's
        // canonical identifier instead.
        assert!(!is_object_identifier(&handles, ""));
        assert!(!is_object_identifier(&handles, "./Media/file.wav"));
        assert!(!is_object_identifier(&handles, "../shared/file.wav"));
        assert!(!is_object_identifier(&handles, "/ws/5/file.wav"));
        assert!(!is_object_identifier(&handles, "Media/file.wav"));
    }

    #[test]
    fn remote_urls_are_recognised() {
        assert!(is_remote_url("https://example.org/corpus/file.wav"));
        assert!(is_remote_url("ftp://mirror.example.org/file.wav"));
        assert!(!is_remote_url("hdl:11142/abc"));
        assert!(!is_remote_url("./local/file.wav"));
        assert!(!is_remote_url("Media/file.wav"));
    }

    #[test]
    fn metadata_type_comparison_ignores_parameters() {
        assert!(is_metadata_mime(
            "application/x-record+xml; charset=utf-8",
            "application/x-record+xml"));
        assert!(!is_metadata_mime("text/plain", "application/x-record+xml"));
    }
}
