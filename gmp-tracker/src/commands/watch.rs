use error_stack::Report;
use valuable::Valuable;

use crate::config::Config;
use crate::Error;

#[derive(clap::Args, Debug, Valuable)]
pub struct Args {
    /// Source transaction hashes or message ids to follow
    #[arg(required = true)]
    pub keys: Vec<String>,
}

pub async fn run(config: Config, args: Args) -> Result<Option<String>, Report<Error>> {
    crate::watch(config, args.keys).await.map(|_| None)
}
