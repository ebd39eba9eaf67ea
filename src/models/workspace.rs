use chrono::{NaiveDateTime, Utc};
use diesel::{
    prelude::*,
    result::Error as DbError,
    Connection as _,
};
use failure::Fail;

use crate::db::{
    Connection,
    models as db,
    schema::{users, workspace_node_replacements, workspace_nodes, workspaces,
        workspace_node_links},
    types::WorkspaceStatus,
};
use super::node::WorkspaceNode;

/// An isolated staging area for one archive edit session.
#[derive(Debug)]
pub struct Workspace {
    data: db::Workspace,
}

impl Workspace {
    /// Construct `Workspace` from its database counterpart.
    pub(crate) fn from_db(data: db::Workspace) -> Workspace {
        Workspace { data }
    }

    /// Find a workspace by ID.
    pub fn by_id(dbconn: &Connection, id: i32)
    -> Result<Workspace, FindWorkspaceError> {
        workspaces::table
            .filter(workspaces::id.eq(id))
            .get_result::<db::Workspace>(dbconn)
            .optional()?
            .ok_or(FindWorkspaceError::NotFound)
            .map(Workspace::from_db)
    }

    /// Get all workspaces.
    pub fn all(dbconn: &Connection) -> Result<Vec<Workspace>, DbError> {
        workspaces::table
            .get_results::<db::Workspace>(dbconn)
            .map(|v| v.into_iter().map(Workspace::from_db).collect())
    }

    /// Get all workspaces awaiting crawler confirmation.
    pub fn in_final_stage(dbconn: &Connection) -> Result<Vec<Workspace>, DbError> {
        workspaces::table
            .filter(workspaces::status.eq(WorkspaceStatus::Submitted))
            .get_results::<db::Workspace>(dbconn)
            .map(|v| v.into_iter().map(Workspace::from_db).collect())
    }

    /// Get all unsubmitted workspaces whose session expired before `now`.
    pub fn expired(dbconn: &Connection, now: NaiveDateTime)
    -> Result<Vec<Workspace>, DbError> {
        workspaces::table
            .filter(workspaces::expires.lt(now)
                .and(workspaces::status.eq_any(&[
                    WorkspaceStatus::Initializing,
                    WorkspaceStatus::Initialized,
                ])))
            .get_results::<db::Workspace>(dbconn)
            .map(|v| v.into_iter().map(Workspace::from_db).collect())
    }

    /// Create a new workspace rooted at an archive reference.
    ///
    /// Two active workspaces must never stage the same subtree, so creation
    /// fails if another unfinished workspace already claims this root.
    pub fn create(
        dbconn: &Connection,
        owner: &db::User,
        top_archive_ref: &str,
        expires: Option<NaiveDateTime>,
    ) -> Result<Workspace, CreateWorkspaceError> {
        dbconn.transaction(|| {
            let active: i64 = workspaces::table
                .filter(workspaces::top_archive_ref.eq(top_archive_ref)
                    .and(workspaces::status.eq_any(&[
                        WorkspaceStatus::Initializing,
                        WorkspaceStatus::Initialized,
                        WorkspaceStatus::Submitted,
                    ])))
                .count()
                .get_result(dbconn)?;

            if active > 0 {
                return Err(CreateWorkspaceError::AlreadyStaged(
                    top_archive_ref.to_string()));
            }

            let now = Utc::now().naive_utc();

            let data = diesel::insert_into(workspaces::table)
                .values(&db::NewWorkspace {
                    owner: owner.id,
                    top_archive_ref,
                    created: now,
                    modified: now,
                    status: WorkspaceStatus::Initializing,
                    expires,
                })
                .get_result::<db::Workspace>(dbconn)?;

            Ok(Workspace::from_db(data))
        })
    }

    /// Get this workspace's owning user.
    pub fn owner(&self, dbconn: &Connection) -> Result<db::User, DbError> {
        users::table
            .filter(users::id.eq(self.data.owner))
            .get_result::<db::User>(dbconn)
    }

    /// Get this workspace's top node.
    pub fn top_node(&self, dbconn: &Connection)
    -> Result<Option<WorkspaceNode>, DbError> {
        match self.data.top_node {
            Some(id) => workspace_nodes::table
                .filter(workspace_nodes::id.eq(id))
                .get_result::<db::WorkspaceNode>(dbconn)
                .optional()
                .map(|n| n.map(WorkspaceNode::from_db)),
            None => Ok(None),
        }
    }

    /// Record a node as this workspace's top node.
    pub fn set_top_node(&mut self, dbconn: &Connection, node: i32)
    -> Result<(), DbError> {
        let data = diesel::update(workspaces::table
                .filter(workspaces::id.eq(self.data.id)))
            .set((
                workspaces::top_node.eq(node),
                workspaces::modified.eq(Utc::now().naive_utc()),
            ))
            .get_result::<db::Workspace>(dbconn)?;

        self.data = data;

        Ok(())
    }

    /// Change this workspace's status, replacing the status message.
    pub fn set_status(
        &mut self,
        dbconn: &Connection,
        status: WorkspaceStatus,
        message: Option<&str>,
    ) -> Result<(), DbError> {
        let data = diesel::update(workspaces::table
                .filter(workspaces::id.eq(self.data.id)))
            .set((
                workspaces::status.eq(status),
                workspaces::message.eq(message),
                workspaces::modified.eq(Utc::now().naive_utc()),
            ))
            .get_result::<db::Workspace>(dbconn)?;

        self.data = data;

        Ok(())
    }

    /// Record the crawler invocation watching this workspace's submission.
    pub fn set_crawl_id(&mut self, dbconn: &Connection, crawl_id: &str)
    -> Result<(), DbError> {
        let data = diesel::update(workspaces::table
                .filter(workspaces::id.eq(self.data.id)))
            .set(workspaces::crawl_id.eq(crawl_id))
            .get_result::<db::Workspace>(dbconn)?;

        self.data = data;

        Ok(())
    }

    /// Record a pending replacement to be turned into a permanent version
    /// record at successful submission.
    pub fn record_replacement(
        &self,
        dbconn: &Connection,
        old_node: i32,
        new_node: i32,
    ) -> Result<(), DbError> {
        diesel::insert_into(workspace_node_replacements::table)
            .values(&db::WorkspaceNodeReplacement { old_node, new_node })
            .on_conflict(workspace_node_replacements::old_node)
            .do_update()
            .set(workspace_node_replacements::new_node.eq(new_node))
            .execute(dbconn)?;

        Ok(())
    }

    /// All replacements recorded in this workspace.
    pub fn pending_replacements(&self, dbconn: &Connection)
    -> Result<Vec<db::WorkspaceNodeReplacement>, DbError> {
        let node_ids = workspace_nodes::table
            .filter(workspace_nodes::workspace.eq(self.data.id))
            .select(workspace_nodes::id);

        workspace_node_replacements::table
            .filter(workspace_node_replacements::old_node.eq_any(node_ids))
            .get_results::<db::WorkspaceNodeReplacement>(dbconn)
    }

    /// Delete this workspace's nodes, links and pending replacements.
    ///
    /// The workspace row itself survives so its terminal status stays
    /// visible.
    pub fn purge_contents(&mut self, dbconn: &Connection) -> Result<(), DbError> {
        dbconn.transaction(|| {
            let node_ids: Vec<i32> = workspace_nodes::table
                .filter(workspace_nodes::workspace.eq(self.data.id))
                .select(workspace_nodes::id)
                .get_results(dbconn)?;

            diesel::delete(workspace_node_replacements::table
                    .filter(workspace_node_replacements::old_node
                        .eq_any(&node_ids)))
                .execute(dbconn)?;

            diesel::delete(workspace_node_links::table
                    .filter(workspace_node_links::parent.eq_any(&node_ids)
                        .or(workspace_node_links::child.eq_any(&node_ids))))
                .execute(dbconn)?;

            diesel::update(workspaces::table
                    .filter(workspaces::id.eq(self.data.id)))
                .set(workspaces::top_node.eq(None::<i32>))
                .execute(dbconn)?;

            diesel::delete(workspace_nodes::table
                    .filter(workspace_nodes::workspace.eq(self.data.id)))
                .execute(dbconn)?;

            self.data.top_node = None;

            Ok(())
        })
    }

    /// Delete this workspace along with its contents.
    pub fn delete(mut self, dbconn: &Connection) -> Result<(), DbError> {
        dbconn.transaction(|| {
            self.purge_contents(dbconn)?;

            diesel::delete(workspaces::table
                    .filter(workspaces::id.eq(self.data.id)))
                .execute(dbconn)?;

            Ok(())
        })
    }
}

impl std::ops::Deref for Workspace {
    type Target = db::Workspace;

    fn deref(&self) -> &db::Workspace {
        &self.data
    }
}

#[derive(Debug, Fail)]
pub enum FindWorkspaceError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No workspace found matching given criteria.
    #[fail(display = "No such workspace")]
    NotFound,
}

impl_from! { for FindWorkspaceError ;
    DbError => |e| FindWorkspaceError::Database(e),
}

#[derive(Debug, Fail)]
pub enum CreateWorkspaceError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Another active workspace is already rooted at this archive reference.
    #[fail(display = "{} is already staged in another workspace", _0)]
    AlreadyStaged(String),
}

impl_from! { for CreateWorkspaceError ;
    DbError => |e| CreateWorkspaceError::Database(e),
}
