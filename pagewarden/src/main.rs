use anyhow::Context;
use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use pagewarden::handlers::*;
use pagewarden_core::SchedulerConfig;
use pagewarden_scanner::{AdmissionFilter, CrawlerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, error};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();

    init_logging(
        chosen_command.get_flag("quiet"),
        chosen_command.get_count("verbose"),
    );

    if let Err(e) = dispatch(&chosen_command).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(quiet: bool, verbosity: u8) {
    let level = match (quiet, verbosity) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn value<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing value for --{name}"))
}

fn admission_filter(args: &ArgMatches) -> AdmissionFilter {
    AdmissionFilter::default().with_allow_loopback(args.get_flag("allow-loopback"))
}

fn crawler_config(args: &ArgMatches) -> anyhow::Result<CrawlerConfig> {
    Ok(CrawlerConfig {
        page_timeout: Duration::from_secs(value(args, "page-timeout")?),
        startup_timeout: Duration::from_secs(value(args, "startup-timeout")?),
        page_delay: Duration::from_millis(value(args, "delay-ms")?),
        filter: admission_filter(args),
    })
}

fn scheduler_config(args: &ArgMatches) -> anyhow::Result<SchedulerConfig> {
    Ok(SchedulerConfig::default()
        .with_max_concurrent(value(args, "max-concurrent")?)
        .with_max_attempts(value(args, "max-attempts")?)
        .with_poll_interval(Duration::from_secs(value(args, "poll-secs")?))
        .with_reconcile_interval(Duration::from_secs(value(args, "reconcile-secs")?))
        .with_retry_backoff(Duration::from_secs(value(args, "retry-backoff-secs")?))
        .with_requeue_discovered(args.get_flag("requeue-discovered")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C, run until killed: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn dispatch(matches: &ArgMatches) -> anyhow::Result<()> {
    let db_path = resolve_db_path(&value::<String>(matches, "db")?);
    let quiet = matches.get_flag("quiet");

    match matches.subcommand() {
        Some(("init", args)) => handle_init(&db_path, args.get_flag("force")),
        Some(("enqueue", args)) => {
            let mut submissions: Vec<String> = args
                .get_many::<String>("URL")
                .map(|urls| urls.cloned().collect())
                .unwrap_or_default();
            if let Some(hosts_file) = args.get_one::<PathBuf>("hosts-file") {
                submissions.extend(load_urls_from_file(hosts_file).map_err(anyhow::Error::msg)?);
            }

            let db = open_database(&db_path)?;
            let queued = handle_enqueue(
                &db,
                &submissions,
                value(args, "max-pages")?,
                value(args, "max-depth")?,
                &admission_filter(args),
            )?;
            if queued == 0 {
                anyhow::bail!("Nothing was queued");
            }
            Ok(())
        }
        Some(("queue", args)) => {
            let db = open_database(&db_path)?;
            match args.subcommand() {
                Some(("list", _)) => handle_queue_list(&db).map(|_| ()),
                Some(("remove", remove)) => {
                    handle_queue_remove(&db, &value::<String>(remove, "URL")?).map(|_| ())
                }
                _ => unreachable!("clap should ensure we don't get here"),
            }
        }
        Some(("scan", args)) => {
            let db = open_database(&db_path)?;
            handle_scan(
                db,
                &value::<String>(args, "URL")?,
                value(args, "max-pages")?,
                value(args, "max-depth")?,
                crawler_config(args)?,
                quiet,
            )
            .await
            .map(|_| ())
        }
        Some(("run", args)) => {
            let db = open_database(&db_path)?;
            handle_run(
                db,
                scheduler_config(args)?,
                crawler_config(args)?,
                shutdown_signal(),
            )
            .await
        }
        Some(("status", args)) => {
            let db = open_database(&db_path)?;
            let scan_id = args.get_one::<String>("SCAN_ID").map(String::as_str);
            handle_status(&db, scan_id, value(args, "limit")?)
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
