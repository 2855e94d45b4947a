use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(name = "ojudge", about = "Judge code submissions in sandboxed containers")]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: SubCmd,

    #[clap(flatten)]
    pub opt: GlobalOpts,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file. Defaults to `<config dir>/ojudge/judger.toml` if it
    /// exists.
    #[clap(long, short, global = true, name = "config-file-path")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Judge a single submission and print the report as JSON
    #[clap(name = "run")]
    Run(RunSubCmd),

    /// Make sure runtime images are present locally
    #[clap(name = "pull")]
    Pull(PullSubCmd),

    /// List supported languages and their runtimes
    #[clap(name = "languages")]
    Languages,
}

#[derive(Args, Debug, Clone)]
pub struct RunSubCmd {
    /// Language of the submission, e.g. `python` or `cpp`
    #[clap(long, short)]
    pub language: String,

    /// Source file of the submission
    #[clap(long, short)]
    pub source: PathBuf,

    /// JSON file containing an array of test cases
    #[clap(long)]
    pub cases: PathBuf,

    /// Time limit of each test case in seconds, overriding the config
    #[clap(long)]
    pub time_limit: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct PullSubCmd {
    /// Only pull images of these languages. Defaults to all.
    #[clap(long = "language", short)]
    pub languages: Vec<String>,
}
