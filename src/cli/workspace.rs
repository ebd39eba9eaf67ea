//! Commands for managing workspaces.

use chrono::{Duration, Utc};
use futures::Future;
use structopt::StructOpt;

use crate::{
    Config,
    Result,
    db::{self, types::WorkspaceStatus},
    export::{ExportWorkspace, Exporter},
    import::{ImportSubtree, Importer, SweepOrphans},
    models::{Workspace, WorkspaceNode},
    services::{self, local},
    upload,
};

#[derive(StructOpt)]
pub struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
pub enum Command {
    /// List workspaces
    #[structopt(name = "list")]
    List,
    /// Create a workspace and import an archive subtree into it
    #[structopt(name = "create")]
    Create(CreateOpts),
    /// Process uploaded files into a workspace
    #[structopt(name = "upload")]
    Upload(UploadOpts),
    /// Mark a node's archive content for deletion on submit
    #[structopt(name = "delete")]
    Delete(DeleteOpts),
    /// Replace a node's archive content with an uploaded file
    #[structopt(name = "replace")]
    Replace(ReplaceOpts),
    /// Submit a workspace, moving its content into the archive
    #[structopt(name = "submit")]
    Submit(SubmitOpts),
    /// Sweep a workspace's orphan directory
    #[structopt(name = "sweep")]
    Sweep(SweepOpts),
}

pub fn main(cfg: &'static Config, opts: Opts) -> Result<()> {
    match opts.command {
        Command::List => list(cfg),
        Command::Create(opts) => create(cfg, opts),
        Command::Upload(opts) => process_upload(cfg, opts),
        Command::Delete(opts) => delete_node(cfg, opts),
        Command::Replace(opts) => replace_node(cfg, opts),
        Command::Submit(opts) => submit(cfg, opts),
        Command::Sweep(opts) => sweep(cfg, opts),
    }
}

pub fn list(cfg: &Config) -> Result<()> {
    let db = db::connect(cfg)?;

    for ws in Workspace::all(&db)? {
        println!("{:4}  {:<20}  {}  {}",
            ws.id,
            ws.status.to_string(),
            ws.top_archive_ref,
            ws.message.as_deref().unwrap_or(""));
    }

    Ok(())
}

#[derive(StructOpt)]
pub struct CreateOpts {
    /// Email address of the owning user
    owner: String,
    /// Archive reference of the subtree to stage
    reference: String,
    /// Days until an unsubmitted workspace expires
    #[structopt(long = "expires-days")]
    expires_days: Option<i64>,
}

pub fn create(cfg: &'static Config, opts: CreateOpts) -> Result<()> {
    let pool = db::pool(cfg)?;
    let db = pool.get()?;

    let owner = super::user::find_by_email(&*db, &opts.owner)?;
    let expires = opts.expires_days
        .map(|days| (Utc::now() + Duration::days(days)).naive_utc());

    let workspace = Workspace::create(&*db, &owner, &opts.reference, expires)?;
    println!("Created workspace {}", workspace.id);

    let services = services::init(local::suite(cfg)).clone();
    let importer = Importer::start(pool.clone(), cfg, services);

    let report = importer
        .send(ImportSubtree {
            workspace: workspace.id,
            reference: opts.reference.clone(),
        })
        .wait()??;

    println!("Imported {} as node {}", opts.reference, report.top_node);
    print_problems(&report.problems);

    Ok(())
}

#[derive(StructOpt)]
pub struct UploadOpts {
    /// Workspace ID
    workspace: i32,
    /// Files to process
    #[structopt(parse(from_os_str))]
    files: Vec<std::path::PathBuf>,
}

pub fn process_upload(cfg: &'static Config, opts: UploadOpts) -> Result<()> {
    let pool = db::pool(cfg)?;
    let db = pool.get()?;

    let services = services::init(local::suite(cfg));
    let mut workspace = Workspace::by_id(&*db, opts.workspace)?;

    let report = upload::process_files(
        &*db, cfg, services, &mut workspace, &opts.files)?;

    println!("Processed {} files into {} nodes",
        opts.files.len(), report.nodes.len());
    print_problems(&report.problems);

    Ok(())
}

#[derive(StructOpt)]
pub struct DeleteOpts {
    /// Node ID
    node: i32,
}

pub fn delete_node(cfg: &'static Config, opts: DeleteOpts) -> Result<()> {
    let db = db::connect(cfg)?;

    let mut node = WorkspaceNode::by_id(&db, opts.node)?;
    let workspace = Workspace::by_id(&db, node.workspace)?;
    ensure_editable(&workspace)?;

    if node.status.is_retired() {
        return Err(failure::err_msg(format!(
            "Node {} is already {}", node.id, node.status)));
    }

    if workspace.top_node == Some(node.id) {
        return Err(failure::err_msg(
            "The top node cannot be deleted; delete the workspace instead"));
    }

    let status = node.status.on_delete();
    node.set_status(&db, status)?;

    println!("Node {} marked {}", opts.node, status);

    Ok(())
}

#[derive(StructOpt)]
pub struct ReplaceOpts {
    /// ID of the node being replaced
    node: i32,
    /// File providing the new content
    #[structopt(parse(from_os_str))]
    file: std::path::PathBuf,
}

pub fn replace_node(cfg: &'static Config, opts: ReplaceOpts) -> Result<()> {
    let pool = db::pool(cfg)?;
    let db = pool.get()?;
    let services = services::init(local::suite(cfg));

    let mut old = WorkspaceNode::by_id(&*db, opts.node)?;
    let mut workspace = Workspace::by_id(&*db, old.workspace)?;

    if old.status.is_retired() {
        return Err(failure::err_msg(format!(
            "Node {} is already {}", old.id, old.status)));
    }

    let report = upload::process_files(
        &*db, cfg, services, &mut workspace, &[opts.file.clone()])?;

    let new_id = report.nodes.first().copied()
        .ok_or_else(|| failure::err_msg("The replacement was not staged"))?;

    old.set_status(&*db, crate::db::types::NodeStatus::Replaced)?;
    workspace.record_replacement(&*db, old.id, new_id)?;

    println!("Node {} will be replaced by node {}", old.id, new_id);
    print_problems(&report.problems);

    Ok(())
}

fn ensure_editable(workspace: &Workspace) -> Result<()> {
    match workspace.status {
        WorkspaceStatus::Initializing | WorkspaceStatus::Initialized => Ok(()),
        status => Err(failure::err_msg(format!(
            "Workspace {} in status {} cannot be edited",
            workspace.id, status))),
    }
}

#[derive(StructOpt)]
pub struct SubmitOpts {
    /// Workspace ID
    workspace: i32,
}

pub fn submit(cfg: &'static Config, opts: SubmitOpts) -> Result<()> {
    let pool = db::pool(cfg)?;
    let db = pool.get()?;

    let mut workspace = Workspace::by_id(&*db, opts.workspace)?;

    if workspace.status.is_terminal()
        || workspace.status == WorkspaceStatus::Submitted
    {
        return Err(failure::err_msg(format!(
            "Workspace {} is already {}", workspace.id, workspace.status)));
    }

    workspace.set_status(&*db, WorkspaceStatus::Submitted, None)?;

    let services = services::init(local::suite(cfg)).clone();
    let exporter = Exporter::start(pool.clone(), cfg, services);

    exporter.send(ExportWorkspace { workspace: workspace.id }).wait()??;

    println!("Workspace {} exported; crawl requested", workspace.id);

    Ok(())
}

#[derive(StructOpt)]
pub struct SweepOpts {
    /// Workspace ID
    workspace: i32,
}

pub fn sweep(cfg: &'static Config, opts: SweepOpts) -> Result<()> {
    let pool = db::pool(cfg)?;
    let services = services::init(local::suite(cfg)).clone();
    let importer = Importer::start(pool, cfg, services);

    let problems = importer
        .send(SweepOrphans { workspace: opts.workspace })
        .wait()??;

    println!("Swept orphan directory of workspace {}", opts.workspace);
    print_problems(&problems);

    Ok(())
}

fn print_problems(problems: &[crate::models::ImportProblem]) {
    for problem in problems {
        println!("  problem: {}", problem);
    }
}
