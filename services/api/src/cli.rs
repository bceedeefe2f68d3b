use crate::commands::{
    create_key, create_user, import_substations, run_pipeline, run_report, CreateKeyArgs,
    CreateUserArgs, PipelineCommand, ReportCommand, SubstationCommand,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use gridflow::config::AppConfig;
use gridflow::error::AppError;
use gridflow::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "gridflow",
    about = "ETL platform for distribution network operator data",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service with the worker and scheduler (default command)
    Serve(ServeArgs),
    /// Create an API user
    Createuser(CreateUserArgs),
    /// Issue an API key for an existing user and print it
    Createkey(CreateKeyArgs),
    /// Launch pipeline jobs or inspect their run history
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
    /// Manage the substation reference dataset
    Substations {
        #[command(subcommand)]
        command: SubstationCommand,
    },
    /// Print operational reports
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Do not start the in-process task worker
    #[arg(long)]
    pub(crate) no_worker: bool,
    /// Do not start the periodic scheduler
    #[arg(long)]
    pub(crate) no_scheduler: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    match command {
        Command::Serve(args) => server::run(config, args).await,
        Command::Createuser(args) => create_user(&config, args),
        Command::Createkey(args) => create_key(&config, args),
        Command::Pipeline { command } => run_pipeline(&config, command),
        Command::Substations { command } => import_substations(&config, command),
        Command::Report { command } => run_report(&config, command),
    }
}
