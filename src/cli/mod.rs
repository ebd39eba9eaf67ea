use actix::System;
use failure::Error;
use futures::IntoFuture;
use structopt::StructOpt;

use crate::{Result, config::Config};

mod server;
mod user;
mod workspace;

#[derive(StructOpt)]
struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Start the engine
    #[structopt(name = "start")]
    Start,
    /// Manage users
    #[structopt(name = "user")]
    User(user::Opts),
    /// Manage workspaces
    #[structopt(name = "workspace")]
    Workspace(workspace::Opts),
}

pub fn main() -> Result<()> {
    let opts = Opts::from_args();
    let config = crate::config::load()?;

    setup_logging(&config.logging)?;

    match opts.command {
        Command::Start => server::start(config),
        Command::User(o) => with_system(user::main, config, o),
        Command::Workspace(o) => with_system(workspace::main, config, o),
    }
}

fn setup_logging(config: &crate::config::Logging) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(config.level);

    for (module, level) in &config.filters {
        builder.filter_module(module, *level);
    }

    builder.try_init()?;
    Ok(())
}

/// Run a function in a context of an Actix system.
fn with_system<F, O, I>(f: F, config: &'static Config, opts: O)
-> Result<I::Item, Error>
where
    F: FnOnce(&'static Config, O) -> I,
    I: IntoFuture,
    I::Error: Send + Sync,
    Error: From<I::Error>,
{
    System::new("curator::cli")
        .block_on(f(config, opts).into_future())
        .map_err(From::from)
}
