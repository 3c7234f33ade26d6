use argh::FromArgs;

#[derive(Debug, FromArgs, Clone)]
/// Acquire DPP-QDC digitizer data into files
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// log every acquisition cycle
    #[argh(switch)]
    pub verbose: bool,
    /// run file path
    #[argh(option)]
    pub config: Option<String>,
}

pub mod cfg;
pub mod driver;
pub mod session;
pub mod writer;
