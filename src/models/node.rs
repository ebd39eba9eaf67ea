use diesel::{
    prelude::*,
    result::Error as DbError,
    Connection as _,
};
use failure::Fail;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::db::{
    Connection,
    models as db,
    schema::{workspace_node_links, workspace_nodes},
    types::NodeStatus,
};

/// A metadata or resource file tracked within a workspace.
#[derive(Clone, Debug)]
pub struct WorkspaceNode {
    data: db::WorkspaceNode,
}

impl WorkspaceNode {
    /// Construct `WorkspaceNode` from its database counterpart.
    pub(crate) fn from_db(data: db::WorkspaceNode) -> WorkspaceNode {
        WorkspaceNode { data }
    }

    /// Find a node by ID.
    pub fn by_id(dbconn: &Connection, id: i32)
    -> Result<WorkspaceNode, FindNodeError> {
        workspace_nodes::table
            .filter(workspace_nodes::id.eq(id))
            .get_result::<db::WorkspaceNode>(dbconn)
            .optional()?
            .ok_or(FindNodeError::NotFound)
            .map(WorkspaceNode::from_db)
    }

    /// Create a new node.
    pub fn create(dbconn: &Connection, node: &db::NewWorkspaceNode)
    -> Result<WorkspaceNode, DbError> {
        diesel::insert_into(workspace_nodes::table)
            .values(node)
            .get_result::<db::WorkspaceNode>(dbconn)
            .map(WorkspaceNode::from_db)
    }

    /// All nodes of a workspace.
    pub fn in_workspace(dbconn: &Connection, workspace: i32)
    -> Result<Vec<WorkspaceNode>, DbError> {
        workspace_nodes::table
            .filter(workspace_nodes::workspace.eq(workspace))
            .order(workspace_nodes::id)
            .get_results::<db::WorkspaceNode>(dbconn)
            .map(|v| v.into_iter().map(WorkspaceNode::from_db).collect())
    }

    /// Nodes of a workspace in any of the given statuses.
    pub fn by_status(
        dbconn: &Connection,
        workspace: i32,
        statuses: &[NodeStatus],
    ) -> Result<Vec<WorkspaceNode>, DbError> {
        workspace_nodes::table
            .filter(workspace_nodes::workspace.eq(workspace)
                .and(workspace_nodes::status.eq_any(statuses)))
            .order(workspace_nodes::id)
            .get_results::<db::WorkspaceNode>(dbconn)
            .map(|v| v.into_iter().map(WorkspaceNode::from_db).collect())
    }

    /// Find a workspace's node carrying a given archive reference.
    pub fn by_archive_ref(
        dbconn: &Connection,
        workspace: i32,
        archive_ref: &str,
    ) -> Result<Option<WorkspaceNode>, DbError> {
        workspace_nodes::table
            .filter(workspace_nodes::workspace.eq(workspace)
                .and(workspace_nodes::archive_ref.eq(archive_ref)))
            .get_result::<db::WorkspaceNode>(dbconn)
            .optional()
            .map(|n| n.map(WorkspaceNode::from_db))
    }

    /// This node's children, with the links leading to them.
    pub fn children(&self, dbconn: &Connection)
    -> Result<Vec<(db::WorkspaceNodeLink, WorkspaceNode)>, DbError> {
        let links = workspace_node_links::table
            .filter(workspace_node_links::parent.eq(self.data.id))
            .order(workspace_node_links::child)
            .get_results::<db::WorkspaceNodeLink>(dbconn)?;

        let mut children = Vec::with_capacity(links.len());

        for link in links {
            let child = workspace_nodes::table
                .filter(workspace_nodes::id.eq(link.child))
                .get_result::<db::WorkspaceNode>(dbconn)?;
            children.push((link, WorkspaceNode::from_db(child)));
        }

        Ok(children)
    }

    /// Link a parent to a child.
    ///
    /// A node keeps at most the parents explicitly linked; if the child
    /// already has one, the attempt is a no-op and `Ok(false)` is returned.
    pub fn link(
        dbconn: &Connection,
        parent: i32,
        child: i32,
        reference: &str,
    ) -> Result<bool, DbError> {
        dbconn.transaction(|| {
            let existing: i64 = workspace_node_links::table
                .filter(workspace_node_links::child.eq(child))
                .count()
                .get_result(dbconn)?;

            if existing > 0 {
                return Ok(false);
            }

            diesel::insert_into(workspace_node_links::table)
                .values(&db::WorkspaceNodeLink {
                    parent,
                    child,
                    reference: reference.to_string(),
                })
                .execute(dbconn)?;

            Ok(true)
        })
    }

    /// IDs of all nodes reachable from the workspace's top node.
    pub fn reachable_ids(dbconn: &Connection, workspace: &db::Workspace)
    -> Result<HashSet<i32>, DbError> {
        let top = match workspace.top_node {
            Some(top) => top,
            None => return Ok(HashSet::new()),
        };

        let node_ids: Vec<i32> = workspace_nodes::table
            .filter(workspace_nodes::workspace.eq(workspace.id))
            .select(workspace_nodes::id)
            .get_results(dbconn)?;

        let links = workspace_node_links::table
            .filter(workspace_node_links::parent.eq_any(&node_ids))
            .get_results::<db::WorkspaceNodeLink>(dbconn)?;

        let mut edges: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in links {
            edges.entry(link.parent).or_insert_with(Vec::new).push(link.child);
        }

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        reachable.insert(top);
        queue.push_back(top);

        while let Some(id) = queue.pop_front() {
            if let Some(children) = edges.get(&id) {
                for &child in children {
                    if reachable.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }

        Ok(reachable)
    }

    /// Nodes of a workspace which fell out of the live tree.
    pub fn unlinked(dbconn: &Connection, workspace: &db::Workspace)
    -> Result<Vec<WorkspaceNode>, DbError> {
        let reachable = WorkspaceNode::reachable_ids(dbconn, workspace)?;

        Ok(WorkspaceNode::in_workspace(dbconn, workspace.id)?
            .into_iter()
            .filter(|node| !reachable.contains(&node.id))
            .collect())
    }

    /// Change this node's status.
    pub fn set_status(&mut self, dbconn: &Connection, status: NodeStatus)
    -> Result<(), DbError> {
        self.data = diesel::update(workspace_nodes::table
                .filter(workspace_nodes::id.eq(self.data.id)))
            .set(workspace_nodes::status.eq(status))
            .get_result::<db::WorkspaceNode>(dbconn)?;

        Ok(())
    }

    /// Reconcile this node's recorded archive reference.
    pub fn set_archive_ref(&mut self, dbconn: &Connection, archive_ref: &str)
    -> Result<(), DbError> {
        self.data = diesel::update(workspace_nodes::table
                .filter(workspace_nodes::id.eq(self.data.id)))
            .set(workspace_nodes::archive_ref.eq(archive_ref))
            .get_result::<db::WorkspaceNode>(dbconn)?;

        Ok(())
    }

    /// Record the node's location in the permanent archive.
    pub fn set_archive_location(&mut self, dbconn: &Connection, location: &str)
    -> Result<(), DbError> {
        self.data = diesel::update(workspace_nodes::table
                .filter(workspace_nodes::id.eq(self.data.id)))
            .set(workspace_nodes::archive_location.eq(location))
            .get_result::<db::WorkspaceNode>(dbconn)?;

        Ok(())
    }

    /// Record the archive reference, location and identifier assigned to a
    /// freshly archived node.
    pub fn set_archived(
        &mut self,
        dbconn: &Connection,
        archive_ref: &str,
        location: &str,
        pid: &str,
    ) -> Result<(), DbError> {
        self.data = diesel::update(workspace_nodes::table
                .filter(workspace_nodes::id.eq(self.data.id)))
            .set((
                workspace_nodes::archive_ref.eq(archive_ref),
                workspace_nodes::archive_location.eq(location),
                workspace_nodes::pid.eq(pid),
            ))
            .get_result::<db::WorkspaceNode>(dbconn)?;

        Ok(())
    }

    /// Unpack database data.
    pub fn into_db(self) -> db::WorkspaceNode {
        self.data
    }
}

impl std::ops::Deref for WorkspaceNode {
    type Target = db::WorkspaceNode;

    fn deref(&self) -> &db::WorkspaceNode {
        &self.data
    }
}

#[derive(Debug, Fail)]
pub enum FindNodeError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No node found matching given criteria.
    #[fail(display = "No such node")]
    NotFound,
}

impl_from! { for FindNodeError ;
    DbError => |e| FindNodeError::Database(e),
}
