use crate::infra::{open_store, save_store};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Subcommand, ValueEnum};
use gridflow::config::AppConfig;
use gridflow::domain::{ApiKey, NewApiKey};
use gridflow::error::AppError;
use gridflow::pipeline::{self, PipelineConfig, PipelineJob, PipelineRunner, RunOutcome, RunRequest};
use gridflow::store::{ApiKeyRepository, RepositoryError, RunRepository, UserRepository};
use gridflow::tasks::maintenance;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct CreateUserArgs {
    #[arg(long)]
    pub(crate) username: String,
    #[arg(long, default_value = "")]
    pub(crate) email: String,
}

#[derive(Args, Debug)]
pub(crate) struct CreateKeyArgs {
    /// Owner of the new key
    #[arg(long)]
    pub(crate) username: String,
    /// Display name for the key (3-100 characters)
    #[arg(long)]
    pub(crate) name: String,
    /// Expire the key after this many days
    #[arg(long)]
    pub(crate) expires_in_days: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PipelineCommand {
    /// Launch a pipeline job once, tagged as a manual run
    Run(PipelineRunArgs),
    /// List recorded pipeline runs, newest first
    Runs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum JobArg {
    EtlPipeline,
    ExtractOnly,
}

impl From<JobArg> for PipelineJob {
    fn from(value: JobArg) -> Self {
        match value {
            JobArg::EtlPipeline => PipelineJob::EtlPipeline,
            JobArg::ExtractOnly => PipelineJob::ExtractOnly,
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct PipelineRunArgs {
    #[arg(value_enum)]
    pub(crate) job: JobArg,
    /// Records to extract per run
    #[arg(long)]
    pub(crate) batch_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SubstationCommand {
    /// Load a DNO substation CSV export into the store
    Import {
        csv: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ReportCommand {
    /// Summarize ETL job outcomes for one UTC day
    Daily(DailyReportArgs),
}

#[derive(Args, Debug)]
pub(crate) struct DailyReportArgs {
    /// Day to report on (YYYY-MM-DD). Defaults to yesterday.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) date: Option<NaiveDate>,
}

pub(crate) fn create_user(config: &AppConfig, args: CreateUserArgs) -> Result<(), AppError> {
    let store = open_store(config)?;
    let user = store.insert_user(args.username.trim(), args.email.trim(), Utc::now())?;
    save_store(config, &store)?;
    println!("Created user {} (id {})", user.username, user.id);
    Ok(())
}

pub(crate) fn create_key(config: &AppConfig, args: CreateKeyArgs) -> Result<(), AppError> {
    let store = open_store(config)?;
    let user = store
        .user_by_username(args.username.trim())?
        .ok_or(RepositoryError::NotFound)?;

    let now = Utc::now();
    let input = NewApiKey {
        name: Some(args.name),
        expires_at: args.expires_in_days.map(|days| now + Duration::days(days)),
        ..NewApiKey::default()
    };
    let key = store.insert_key(ApiKey::issue(user.id, input, now)?)?;
    save_store(config, &store)?;

    println!("Created API key '{}' for {}", key.name, user.username);
    println!("{}", key.key);
    Ok(())
}

pub(crate) fn run_pipeline(config: &AppConfig, command: PipelineCommand) -> Result<(), AppError> {
    let store = Arc::new(open_store(config)?);

    match command {
        PipelineCommand::Run(args) => {
            let mut pipeline_config = PipelineConfig::default();
            if let Some(batch_size) = args.batch_size {
                pipeline_config.batch_size = batch_size;
            }
            let runner = PipelineRunner::new(store.clone(), pipeline_config);
            let request = RunRequest::manual(args.job.into(), Utc::now());

            match runner.launch(request, Utc::now())? {
                RunOutcome::Completed(run) => {
                    println!("Run {} ({}) finished: {:?}", run.run_key, run.job, run.status);
                    if let Some(output) = &run.output {
                        println!("{}", serde_json::to_string_pretty(output).unwrap_or_default());
                    }
                    if let Some(error) = &run.error {
                        println!("Error: {error}");
                    }
                }
                RunOutcome::Skipped { run_key } => println!("Run {run_key} was already launched"),
            }
            save_store(config, &store)?;
        }
        PipelineCommand::Runs => {
            let mut runs = store.runs()?;
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            if runs.is_empty() {
                println!("No pipeline runs recorded");
            }
            for run in runs {
                println!(
                    "{}  {:<13} {:<9} {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.job,
                    format!("{:?}", run.status),
                    run.run_key
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn import_substations(
    config: &AppConfig,
    command: SubstationCommand,
) -> Result<(), AppError> {
    let SubstationCommand::Import { csv } = command;
    let store = open_store(config)?;
    let summary = pipeline::substations::import_path(&store, &csv)?;
    save_store(config, &store)?;

    println!(
        "Imported {} substation rows ({} new, {} updated)",
        summary.rows, summary.inserted, summary.updated
    );
    Ok(())
}

pub(crate) fn run_report(config: &AppConfig, command: ReportCommand) -> Result<(), AppError> {
    let ReportCommand::Daily(args) = command;
    let store = open_store(config)?;
    let date = args
        .date
        .unwrap_or_else(|| (Utc::now() - Duration::days(1)).date_naive());
    let report = maintenance::daily_report(&store, date)?;

    println!("Daily ETL report for {}", report.date);
    println!("  Total jobs:        {}", report.total_jobs);
    println!("  Completed:         {}", report.completed_jobs);
    println!("  Failed:            {}", report.failed_jobs);
    println!("  Records processed: {}", report.total_records_processed);
    println!("  Success rate:      {:.1}%", report.success_rate);
    Ok(())
}
