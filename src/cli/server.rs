//! Engine startup.

use actix::{System, SystemService};

use crate::{
    Config,
    Result,
    db,
    mail::Mailer,
    services::{self, local},
    submission::CompletionPoller,
};

pub fn start(config: &'static Config) -> Result<()> {
    let system = System::new("curator");

    // Connect early so configuration problems surface at startup rather
    // than on the first poll.
    db::pool(config)?;
    services::init(local::suite(config));

    Mailer::from_registry();
    CompletionPoller::from_registry();

    info!("Submission poller running every {} seconds",
        config.submission.poll_interval);

    system.run();

    Ok(())
}
