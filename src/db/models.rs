use chrono::NaiveDateTime;

use super::schema::*;
use super::types::{NodeKind, NodeStatus, WorkspaceStatus};

#[derive(Associations, Clone, Debug, Identifiable, Queryable)]
pub struct User {
    pub id: i32,
    /// User's email address, used for submission notifications.
    pub email: String,
    /// User's display name.
    pub name: String,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "users"]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
}

#[derive(Associations, Clone, Debug, Identifiable, Queryable)]
#[belongs_to(User, foreign_key = "owner")]
pub struct Workspace {
    /// ID of this workspace.
    pub id: i32,
    /// ID of the user owning this workspace.
    pub owner: i32,
    /// ID of the node forming the root of this workspace's tree. Set once
    /// import of the top node has succeeded.
    pub top_node: Option<i32>,
    /// Archive reference of the subtree staged in this workspace.
    pub top_archive_ref: String,
    /// Date this workspace was created.
    pub created: NaiveDateTime,
    /// Date of the last change to this workspace.
    pub modified: NaiveDateTime,
    /// Lifecycle status.
    pub status: WorkspaceStatus,
    /// Free-text status message, mainly used for error reporting.
    pub message: Option<String>,
    /// Invocation ID of the crawl requested at submission.
    pub crawl_id: Option<String>,
    /// Date after which an unsubmitted workspace is considered abandoned.
    pub expires: Option<NaiveDateTime>,
}

#[derive(Clone, Copy, Debug, Insertable)]
#[table_name = "workspaces"]
pub struct NewWorkspace<'a> {
    pub owner: i32,
    pub top_archive_ref: &'a str,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
    pub status: WorkspaceStatus,
    pub expires: Option<NaiveDateTime>,
}

#[derive(Associations, Clone, Debug, Identifiable, Queryable)]
#[belongs_to(Workspace, foreign_key = "workspace")]
pub struct WorkspaceNode {
    /// ID of this node.
    pub id: i32,
    /// ID of the workspace this node belongs to.
    pub workspace: i32,
    /// Archive catalog reference, absent for nodes which were never archived.
    pub archive_ref: Option<String>,
    /// Location of this node's content in the permanent archive.
    pub archive_location: Option<String>,
    /// Location of this node's content in the workspace staging area. Absent
    /// for purely external nodes.
    pub staging_location: Option<String>,
    /// Location this node's content originally came from.
    pub origin_location: Option<String>,
    /// Display name (usually the file's basename).
    pub name: String,
    /// Content classification.
    pub kind: NodeKind,
    /// Declared or verified media type.
    pub mime: Option<String>,
    /// Node status.
    pub status: NodeStatus,
    /// Persistent identifier of the archived object.
    pub pid: Option<String>,
    /// False when the type checker rejected this file outright.
    pub archivable: bool,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "workspace_nodes"]
pub struct NewWorkspaceNode<'a> {
    pub workspace: i32,
    pub archive_ref: Option<&'a str>,
    pub archive_location: Option<&'a str>,
    pub staging_location: Option<&'a str>,
    pub origin_location: Option<&'a str>,
    pub name: &'a str,
    pub kind: NodeKind,
    pub mime: Option<&'a str>,
    pub status: NodeStatus,
    pub pid: Option<&'a str>,
    pub archivable: bool,
}

#[derive(Clone, Debug, Identifiable, Insertable, Queryable)]
#[table_name = "workspace_node_links"]
#[primary_key(parent, child)]
pub struct WorkspaceNodeLink {
    /// ID of the parent node.
    pub parent: i32,
    /// ID of the child node.
    pub child: i32,
    /// Reference identifier as it appears in the parent's document.
    pub reference: String,
}

#[derive(Clone, Copy, Debug, Identifiable, Insertable, Queryable)]
#[table_name = "workspace_node_replacements"]
#[primary_key(old_node)]
pub struct WorkspaceNodeReplacement {
    /// Node whose content is being replaced.
    pub old_node: i32,
    /// Node providing the new content.
    pub new_node: i32,
}
