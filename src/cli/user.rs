//! Commands for managing users.

use diesel::prelude::*;
use structopt::StructOpt;

use crate::{
    Config,
    Result,
    db::{self, Connection, models, schema::users},
};

#[derive(StructOpt)]
pub struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
pub enum Command {
    /// Add a new user
    #[structopt(name = "add")]
    Add(AddOpts),
    /// List users
    #[structopt(name = "list")]
    List,
}

pub fn main(cfg: &'static Config, opts: Opts) -> Result<()> {
    match opts.command {
        Command::Add(opts) => add_user(cfg, opts),
        Command::List => list_users(cfg),
    }
}

#[derive(StructOpt)]
pub struct AddOpts {
    /// User's email address
    email: String,
    /// User's name
    #[structopt(long = "name", short = "n")]
    name: String,
}

pub fn add_user(cfg: &Config, opts: AddOpts) -> Result<()> {
    let db = db::connect(cfg)?;

    let user = diesel::insert_into(users::table)
        .values(&models::NewUser {
            email: &opts.email,
            name: &opts.name,
        })
        .get_result::<models::User>(&db)?;

    println!("Created user {}", user.id);

    Ok(())
}

pub fn list_users(cfg: &Config) -> Result<()> {
    let db = db::connect(cfg)?;

    for user in users::table.order(users::id).get_results::<models::User>(&db)? {
        println!("{:4}  {}  <{}>", user.id, user.name, user.email);
    }

    Ok(())
}

/// Find a user by their email address.
pub(crate) fn find_by_email(dbconn: &Connection, email: &str)
-> Result<models::User> {
    users::table
        .filter(users::email.eq(email))
        .get_result::<models::User>(dbconn)
        .optional()?
        .ok_or_else(|| failure::err_msg(format!("No user with email {}", email)))
}
