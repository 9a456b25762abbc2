use anyhow::Context;
use clap::Parser;
use coursegrab::cli::{Args, Command, SessionArgs, parse_time};
use coursegrab::config::Config;
use coursegrab::logging::setup_logging;
use coursegrab::portal::{CategoryScope, PortalApi, PortalSession, SelectionRequest};
use coursegrab::scheduler::{CreateTaskRequest, GrabScheduler, TaskStatus};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging needs the config, so a config error can only go to stderr.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        schools = config.schools.len(),
        "starting coursegrab"
    );

    match run(args.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "coursegrab failed");
            ExitCode::FAILURE
        }
    }
}

fn session(config: &Config, args: &SessionArgs) -> anyhow::Result<PortalSession> {
    let endpoint = config.school(&args.school)?.clone();
    Ok(PortalSession::new(args.credential.clone(), endpoint))
}

fn scope(categories: Vec<String>) -> CategoryScope {
    if categories.is_empty() {
        CategoryScope::All
    } else {
        CategoryScope::Codes(categories)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: &Config) -> anyhow::Result<ExitCode> {
    let api = PortalApi::new_with_config(config).context("Failed to build HTTP client")?;

    match command {
        Command::Fetch {
            session: session_args,
            categories,
            report,
        } => {
            let session = session(config, &session_args)?;
            let fetched = api.fetch_report(&session, &scope(categories)).await?;
            if fetched.session_expired() {
                warn!("Portal reported an expired session; log in again and refresh the cookie");
            }
            info!(
                courses = fetched.courses.len(),
                failed_chunks = fetched.failed_chunks(),
                "Fetch finished"
            );
            if report {
                print_json(&fetched)?;
            } else {
                print_json(&fetched.courses)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Select {
            session: session_args,
            section,
            execution_section,
            course,
            category,
            window,
        } => {
            let session = session(config, &session_args)?;
            let request = SelectionRequest {
                section_id: section,
                execution_section_id: execution_section,
                course_id: course,
                section_count: 1,
                category_code: category,
                selection_window_id: window,
            };
            let result = api.select_single(&session, &request).await?;
            print_json(&result)?;
            Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Batch {
            session: session_args,
            file,
            batch_size,
            delay,
        } => {
            let session = session(config, &session_args)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let requests: Vec<SelectionRequest> =
                serde_json::from_str(&text).with_context(|| {
                    format!("{} is not a JSON array of selection requests", file.display())
                })?;

            let results = api
                .select_batch(
                    &session,
                    &requests,
                    batch_size.unwrap_or(config.batch_size),
                    delay.unwrap_or(config.inter_batch_delay),
                )
                .await?;
            print_json(&results)?;
            Ok(if results.iter().all(|r| r.success) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Grab {
            session: session_args,
            keywords,
            at,
            until,
            categories,
            include_full,
        } => {
            let session = session(config, &session_args)?;
            let mut request = CreateTaskRequest::new(
                session_args.school.clone(),
                session,
                keywords,
                parse_time(&at, config.timezone)?,
                parse_time(&until, config.timezone)?,
            );
            request.scope = scope(categories);
            request.skip_full = !include_full;

            let scheduler = GrabScheduler::from_config(api, config);
            let id = scheduler.create_scheduled_task(request)?;

            let snapshot = tokio::select! {
                snapshot = scheduler.wait_for_terminal(id) => snapshot?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, cancelling task");
                    if let Err(e) = scheduler.cancel_scheduled_task(id) {
                        warn!(error = %e, "Cancel failed");
                    }
                    scheduler.get_scheduled_task_status(id)?
                }
            };
            scheduler.shutdown().await;

            print_json(&snapshot)?;
            Ok(if snapshot.status == TaskStatus::Succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
