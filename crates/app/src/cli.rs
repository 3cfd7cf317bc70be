use clap::Parser;
use vision::TriggerCliArgs;

/// Watch a live feed for a target object and play a clip while it is in view.
#[derive(Parser, Debug)]
#[command(name = "trigger", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub args: TriggerCliArgs,
}
