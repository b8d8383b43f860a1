use error_stack::{Report, ResultExt};
use valuable::Valuable;

use crate::config::Config;
use crate::Error;

#[derive(clap::Args, Debug, Valuable)]
pub struct Args {
    /// Source transaction hash or message id (`{tx hash}-{index}`)
    pub key: String,
}

pub async fn run(config: Config, args: Args) -> Result<Option<String>, Report<Error>> {
    let snapshot = crate::status(config, &args.key).await?;

    serde_json::to_string_pretty(&snapshot)
        .change_context(Error::Serialization)
        .map(Some)
}
