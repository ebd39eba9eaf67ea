//! Placement of retired file content.
//!
//! When a submitted workspace deletes or replaces an archived file, the old
//! content is not destroyed; it moves into a retention area scoped by
//! calendar month and workspace.

use chrono::Utc;
use failure::Fail;
use std::{fs, io, path::{Path, PathBuf}};

use crate::{config::Storage, db::models as db};

/// Where retired content goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Destination {
    /// Retention area for deleted content.
    Trash,
    /// Retention area for replaced content.
    Version,
}

/// Move a node's current archive content into a retention area, returning
/// the new location.
///
/// On failure the original file is left untouched.
pub fn place(
    storage: &Storage,
    destination: Destination,
    workspace: i32,
    node: &db::WorkspaceNode,
) -> Result<PathBuf, PlaceError> {
    let source = node.archive_location.as_ref()
        .ok_or(PlaceError::NothingToMove(node.id))?;

    let base = match destination {
        Destination::Trash => &storage.trash,
        Destination::Version => &storage.versions,
    };

    let month = Utc::now().format("%Y-%m").to_string();
    let dir = destination_dir(base, &month, workspace);

    fs::create_dir_all(&dir)?;

    let meta = fs::metadata(&dir)?;
    if !meta.is_dir() {
        return Err(PlaceError::NotADirectory(dir));
    }
    if meta.permissions().readonly() {
        return Err(PlaceError::NotWritable(dir));
    }

    let target = dir.join(retired_name(node));

    fs::rename(source, &target)?;

    Ok(target)
}

/// Retention directory for one workspace and month.
fn destination_dir(base: &Path, month: &str, workspace: i32) -> PathBuf {
    base.join(month).join(workspace.to_string())
}

/// Retired filename: `v<archive-id-or-handle>__.<original-basename>`.
///
/// The identifier part keeps names of nodes sharing a basename distinct
/// within one retention directory.
fn retired_name(node: &db::WorkspaceNode) -> String {
    let id = node.archive_ref.as_ref()
        .or(node.pid.as_ref())
        .map(|id| sanitize(id))
        .unwrap_or_else(|| node.id.to_string());

    format!("v{}__.{}", id, node.name)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Fail)]
pub enum PlaceError {
    /// Node has no archived content to move.
    #[fail(display = "Node {} has no archive location", _0)]
    NothingToMove(i32),
    /// Retention destination exists but is not a directory.
    #[fail(display = "{:?} is not a directory", _0)]
    NotADirectory(PathBuf),
    /// Retention destination cannot be written to.
    #[fail(display = "{:?} is not writable", _0)]
    NotWritable(PathBuf),
    /// An operating system error.
    #[fail(display = "System error: {}", _0)]
    System(#[cause] io::Error),
}

impl_from! { for PlaceError ;
    io::Error => |e| PlaceError::System(e),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{NodeKind, NodeStatus};
    use tempfile::tempdir;

    fn node(id: i32, name: &str, archive_ref: Option<&str>) -> db::WorkspaceNode {
        db::WorkspaceNode {
            id,
            workspace: 1,
            archive_ref: archive_ref.map(str::to_string),
            archive_location: None,
            staging_location: None,
            origin_location: None,
            name: name.to_string(),
            kind: NodeKind::Resource,
            mime: Some("text/plain".to_string()),
            status: NodeStatus::Deleted,
            pid: None,
            archivable: true,
        }
    }

    fn storage(root: &Path) -> Storage {
        Storage {
            archive: root.join("archive"),
            workspaces: root.join("workspaces"),
            orphans: root.join("orphans"),
            trash: root.join("trash"),
            versions: root.join("versions"),
        }
    }

    #[test]
    fn retired_names_are_distinct_for_shared_basenames() {
        let a = retired_name(&node(1, "audio.wav", Some("obj-17")));
        let b = retired_name(&node(2, "audio.wav", Some("obj-18")));

        assert_eq!(a, "vobj_17__.audio.wav");
        assert_ne!(a, b);
    }

    #[test]
    fn retired_name_falls_back_to_node_id() {
        assert_eq!(retired_name(&node(7, "x.txt", None)), "v7__.x.txt");
    }

    #[test]
    fn destination_is_scoped_by_month_and_workspace() {
        let dir = destination_dir(Path::new("/trash"), "2026-08", 42);
        assert_eq!(dir, PathBuf::from("/trash/2026-08/42"));
    }

    #[test]
    fn place_moves_content() {
        let root = tempdir().unwrap();
        let storage = storage(root.path());

        let source = root.path().join("old.txt");
        fs::write(&source, b"retired content").unwrap();

        let mut n = node(3, "old.txt", Some("obj-3"));
        n.archive_location = Some(source.to_str().unwrap().to_string());

        let target = place(&storage, Destination::Trash, 5, &n).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"retired content");
        assert!(target.starts_with(&storage.trash));
    }

    #[test]
    fn place_distinguishes_nodes_sharing_a_basename() {
        let root = tempdir().unwrap();
        let storage = storage(root.path());

        let mut targets = Vec::new();

        for (id, reference) in &[(1, "obj-1"), (2, "obj-2")] {
            let source = root.path().join(format!("src-{}.txt", id));
            fs::write(&source, b"x").unwrap();

            let mut n = node(*id, "same.txt", Some(reference));
            n.archive_location = Some(source.to_str().unwrap().to_string());

            targets.push(place(&storage, Destination::Trash, 5, &n).unwrap());
        }

        assert_ne!(targets[0], targets[1]);
        assert!(targets[0].parent() == targets[1].parent());
    }

    #[test]
    fn failed_move_leaves_source_untouched() {
        let root = tempdir().unwrap();
        let storage = storage(root.path());

        let mut n = node(4, "gone.txt", None);
        n.archive_location = Some(
            root.path().join("missing.txt").to_str().unwrap().to_string());

        assert!(place(&storage, Destination::Version, 5, &n).is_err());
    }
}
