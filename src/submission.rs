//! Finishing submitted workspaces.
//!
//! After export the engine waits for the crawler to confirm it has seen the
//! new content. The poller checks every submitted workspace on an interval,
//! drives each to its terminal status independently, and cleans up expired
//! unsubmitted workspaces along the way.

use actix::{Actor, AsyncContext, Context, Supervised, SystemService};
use chrono::Utc;
use lettre_email::Mailbox;
use std::{fs, time::Duration};

use crate::{
    Config,
    config,
    db::{Connection, Pool, types::WorkspaceStatus},
    mail::Mailer,
    models::Workspace,
    services::{self, CrawlState, CrawlerService, Services},
};

/// Periodic checker of submitted workspaces.
pub struct CompletionPoller {
    pool: Pool,
    config: &'static Config,
    services: Services,
}

impl Default for CompletionPoller {
    fn default() -> Self {
        let config = config::load()
            .expect("Configuration should be ready when poller is started");
        let pool = crate::db::pool(config)
            .expect("Database should be ready when poller is started");
        let services = services::get()
            .expect("Services should be ready when poller is started")
            .clone();

        CompletionPoller { pool, config, services }
    }
}

impl Actor for CompletionPoller {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let every = Duration::from_secs(self.config.submission.poll_interval);
        ctx.run_interval(every, |poller, _| poller.tick());
    }
}

impl Supervised for CompletionPoller {
}

impl SystemService for CompletionPoller {
}

/// What one poll of a workspace concluded.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Decision {
    /// The crawl is still running; look again later.
    Wait,
    /// Finish the workspace successfully.
    Succeed,
    /// Record version history first, then finish.
    Version,
    /// Finish the workspace in the given error status.
    Fail(WorkspaceStatus),
}

/// Map a crawl state and the number of pending replacements to a decision.
pub(crate) fn decide(state: &CrawlState, replacements: usize) -> Decision {
    match *state {
        CrawlState::Running => Decision::Wait,
        CrawlState::Success if replacements > 0 => Decision::Version,
        CrawlState::Success => Decision::Succeed,
        CrawlState::Crashed | CrawlState::Other(_) =>
            Decision::Fail(WorkspaceStatus::CrawlerError),
    }
}

/// What one poll concluded should be recorded on the workspace.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Outcome {
    /// The crawl has not settled; nothing changes.
    Wait,
    /// The workspace finished successfully; its contents may be cleaned up.
    Finished,
    /// The workspace finished in an error status. Contents stay intact.
    Failed(WorkspaceStatus, String),
}

/// Consult the crawler about a workspace's crawl and create version records
/// for its replacements, all in one batch, once the crawl succeeded.
///
/// A crashed crawl never reaches version creation; a failed version batch
/// leaves the moved content alone and only the history is missing.
pub(crate) fn settle(
    crawler: &dyn CrawlerService,
    crawl_id: &str,
    replacements: &[(String, String)],
) -> crate::Result<Outcome> {
    let state = crawler.state(crawl_id)?;

    match decide(&state, replacements.len()) {
        Decision::Wait => Ok(Outcome::Wait),

        Decision::Succeed => Ok(Outcome::Finished),

        Decision::Version => match crawler.create_versions(replacements) {
            Ok(()) => Ok(Outcome::Finished),
            Err(err) => Ok(Outcome::Failed(
                WorkspaceStatus::VersioningError,
                format!("Version creation failed: {}", err))),
        },

        Decision::Fail(status) => {
            let message = match state {
                CrawlState::Other(ref detail) =>
                    format!("Crawler reported: {}", detail),
                _ => "Crawler crashed".to_string(),
            };
            Ok(Outcome::Failed(status, message))
        }
    }
}

impl CompletionPoller {
    fn tick(&mut self) {
        let db = match self.pool.get() {
            Ok(db) => db,
            Err(err) => {
                error!("Poller could not obtain database connection: {}", err);
                return;
            }
        };

        self.clean_expired(&*db);

        let submitted = match Workspace::in_final_stage(&*db) {
            Ok(submitted) => submitted,
            Err(err) => {
                error!("Poller could not list submitted workspaces: {}", err);
                return;
            }
        };

        // Workspaces finish independently; one failing never stalls the
        // others.
        for mut workspace in submitted {
            if let Err(err) = self.check(&*db, &mut workspace) {
                error!("Could not check workspace {}: {}", workspace.id, err);
            }
        }
    }

    /// Check a single submitted workspace and, if its crawl has settled,
    /// drive it to a terminal status.
    fn check(&self, dbconn: &Connection, workspace: &mut Workspace)
    -> crate::Result<()> {
        let crawl_id = match workspace.crawl_id.clone() {
            Some(crawl_id) => crawl_id,
            // Export has not handed over to the crawler yet.
            None => return Ok(()),
        };

        let replacements = workspace.pending_replacements(dbconn)?;
        let pairs = self.version_pairs(dbconn, &replacements)?;

        match settle(&*self.services.crawler, &crawl_id, &pairs)? {
            Outcome::Wait => Ok(()),
            Outcome::Finished => self.finish(dbconn, workspace),
            Outcome::Failed(status, message) =>
                self.fail(dbconn, workspace, status, &message),
        }
    }

    /// Version records to create: one `(old, new)` reference pair per
    /// pending replacement.
    fn version_pairs(
        &self,
        dbconn: &Connection,
        replacements: &[crate::db::models::WorkspaceNodeReplacement],
    ) -> crate::Result<Vec<(String, String)>> {
        use crate::models::WorkspaceNode;

        let mut pairs = Vec::with_capacity(replacements.len());

        for replacement in replacements {
            let old = WorkspaceNode::by_id(dbconn, replacement.old_node)?;
            let new = WorkspaceNode::by_id(dbconn, replacement.new_node)?;

            let old_ref = old.pid.clone()
                .or_else(|| old.archive_ref.clone());
            let new_ref = new.pid.clone()
                .or_else(|| new.archive_ref.clone());

            if let (Some(old_ref), Some(new_ref)) = (old_ref, new_ref) {
                pairs.push((old_ref, new_ref));
            }
        }

        Ok(pairs)
    }

    fn finish(&self, dbconn: &Connection, workspace: &mut Workspace)
    -> crate::Result<()> {
        workspace.set_status(dbconn, WorkspaceStatus::DataMovedSuccess, None)?;
        workspace.purge_contents(dbconn)?;

        remove_dir(&self.config.storage.workspace_dir(workspace.id));
        remove_dir(&self.config.storage.orphan_dir(workspace.id));

        info!("Workspace {} finished successfully", workspace.id);
        self.notify(dbconn, workspace, "Submission archived", &format!(
            "Your workspace {} ({}) has been archived successfully.",
            workspace.id, workspace.top_archive_ref));

        Ok(())
    }

    fn fail(
        &self,
        dbconn: &Connection,
        workspace: &mut Workspace,
        status: WorkspaceStatus,
        message: &str,
    ) -> crate::Result<()> {
        workspace.set_status(dbconn, status, Some(message))?;

        warn!("Workspace {} finished in status {}: {}",
            workspace.id, status, message);
        self.notify(dbconn, workspace, "Submission failed", &format!(
            "Your workspace {} ({}) could not be completed: {}\n\
             An operator has been notified.",
            workspace.id, workspace.top_archive_ref, message));

        if let Some(operator) = self.config.mail.operator.clone() {
            Mailer::send(operator, "Workspace needs attention", format!(
                "Workspace {} ({}) finished in status {}: {}",
                workspace.id, workspace.top_archive_ref, status, message));
        }

        Ok(())
    }

    /// Mail the workspace's owner. Mail problems are logged, never fatal.
    fn notify(
        &self,
        dbconn: &Connection,
        workspace: &Workspace,
        subject: &str,
        text: &str,
    ) {
        match workspace.owner(dbconn) {
            Ok(owner) => {
                let to = Mailbox::new_with_name(owner.name, owner.email);
                Mailer::send(to, subject, text);
            }
            Err(err) => {
                error!("Could not find owner of workspace {}: {}",
                    workspace.id, err);
            }
        }
    }

    /// Remove abandoned workspaces whose session expired.
    fn clean_expired(&self, dbconn: &Connection) {
        let expired = match Workspace::expired(dbconn, Utc::now().naive_utc()) {
            Ok(expired) => expired,
            Err(err) => {
                error!("Poller could not list expired workspaces: {}", err);
                return;
            }
        };

        for workspace in expired {
            let id = workspace.id;
            info!("Removing expired workspace {}", id);

            remove_dir(&self.config.storage.workspace_dir(id));
            remove_dir(&self.config.storage.orphan_dir(id));

            if let Err(err) = workspace.delete(dbconn) {
                error!("Could not delete expired workspace {}: {}", id, err);
            }
        }
    }
}

fn remove_dir(dir: &std::path::Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove {:?}: {}", dir, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::local::LocalCrawler;

    fn pairs() -> Vec<(String, String)> {
        vec![
            ("hdl:11142/old-a".to_string(), "hdl:11142/new-a".to_string()),
            ("hdl:11142/old-b".to_string(), "hdl:11142/new-b".to_string()),
        ]
    }

    #[test]
    fn settling_waits_until_the_crawl_ends() {
        let crawler = LocalCrawler::new();
        crawler.set_default_state(CrawlState::Running);
        let id = crawler.invoke("obj-1").unwrap();

        assert_eq!(settle(&crawler, &id, &[]).unwrap(), Outcome::Wait);

        crawler.set_state(&id, CrawlState::Success);
        assert_eq!(settle(&crawler, &id, &[]).unwrap(), Outcome::Finished);
    }

    #[test]
    fn replacements_are_versioned_in_one_batch() {
        let crawler = LocalCrawler::new();
        let id = crawler.invoke("obj-1").unwrap();

        assert_eq!(settle(&crawler, &id, &pairs()).unwrap(),
            Outcome::Finished);
        assert_eq!(crawler.version_batches(), vec![pairs()]);
    }

    #[test]
    fn crashed_crawls_never_reach_version_creation() {
        let crawler = LocalCrawler::new();
        crawler.set_default_state(CrawlState::Crashed);
        let id = crawler.invoke("obj-1").unwrap();

        assert_eq!(settle(&crawler, &id, &pairs()).unwrap(),
            Outcome::Failed(
                WorkspaceStatus::CrawlerError,
                "Crawler crashed".to_string()));
        assert!(crawler.version_batches().is_empty());
    }

    #[test]
    fn a_failed_version_batch_does_not_finish_the_workspace() {
        let crawler = LocalCrawler::new();
        crawler.fail_versions(true);
        let id = crawler.invoke("obj-1").unwrap();

        match settle(&crawler, &id, &pairs()).unwrap() {
            Outcome::Failed(WorkspaceStatus::VersioningError, _) => {}
            outcome => panic!("Unexpected outcome: {:?}", outcome),
        }
        assert!(crawler.version_batches().is_empty());
    }

    #[test]
    fn running_crawls_wait() {
        assert_eq!(decide(&CrawlState::Running, 0), Decision::Wait);
        assert_eq!(decide(&CrawlState::Running, 3), Decision::Wait);
    }

    #[test]
    fn successful_crawls_finish() {
        assert_eq!(decide(&CrawlState::Success, 0), Decision::Succeed);
    }

    #[test]
    fn replacements_require_versioning_first() {
        assert_eq!(decide(&CrawlState::Success, 2), Decision::Version);
    }

    #[test]
    fn crashed_crawls_fail_the_workspace() {
        assert_eq!(
            decide(&CrawlState::Crashed, 0),
            Decision::Fail(WorkspaceStatus::CrawlerError));
        assert_eq!(
            decide(&CrawlState::Other("vanished".to_string()), 1),
            Decision::Fail(WorkspaceStatus::CrawlerError));
    }
}
