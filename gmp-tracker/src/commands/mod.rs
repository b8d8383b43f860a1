use clap::Subcommand;
use valuable::Valuable;

pub mod status;
pub mod watch;

#[derive(Debug, Subcommand, Valuable)]
pub enum SubCommand {
    /// Print the lifecycle of one message and the recovery actions currently legal for it
    Status(status::Args),
    /// Follow messages until they settle, logging every step change
    Watch(watch::Args),
}
