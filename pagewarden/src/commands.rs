use crate::CLAP_STYLING;
use clap::{Arg, ArgAction, arg, command, value_parser};

/// Crawl tunables shared by `scan` and `run`.
fn crawler_args() -> [Arg; 3] {
    [
        arg!(--"page-timeout" <SECONDS>)
            .required(false)
            .help("Per-page load and analysis timeout")
            .env("PAGEWARDEN_PAGE_TIMEOUT")
            .value_parser(value_parser!(u64))
            .default_value("30"),
        arg!(--"startup-timeout" <SECONDS>)
            .required(false)
            .help("Timeout for the page loader to become ready before a crawl")
            .env("PAGEWARDEN_STARTUP_TIMEOUT")
            .value_parser(value_parser!(u64))
            .default_value("30"),
        arg!(--"delay-ms" <MILLIS>)
            .required(false)
            .help("Politeness delay between pages of one crawl")
            .env("PAGEWARDEN_PAGE_DELAY_MS")
            .value_parser(value_parser!(u64))
            .default_value("250"),
    ]
}

/// Limits applied to a seed url.
fn limit_args() -> [Arg; 2] {
    [
        arg!(--"max-pages" <NUM>)
            .required(false)
            .help("Maximum number of pages to visit per crawl")
            .env("PAGEWARDEN_MAX_PAGES")
            .value_parser(value_parser!(usize))
            .default_value("50"),
        arg!(--"max-depth" <NUM>)
            .required(false)
            .help("Maximum link depth from the seed url (the seed is depth 0)")
            .env("PAGEWARDEN_MAX_DEPTH")
            .value_parser(value_parser!(usize))
            .default_value("2"),
    ]
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("pagewarden")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("pagewarden")
        .about("Breadth-first accessibility crawler with a durable scan queue")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Only print errors and results")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (repeatable)")
                .required(false)
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the pagewarden database")
                .env("PAGEWARDEN_DB")
                .default_value("~/.config/pagewarden/pagewarden.db"),
        )
        .arg(
            arg!(--"allow-loopback" "Allow localhost and loopback addresses as targets")
                .required(false)
                .global(true)
                .env("PAGEWARDEN_ALLOW_LOOPBACK"),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Creates the pagewarden database")
                .arg(
                    arg!(-f --"force")
                        .help("Deletes any existing database at the location first")
                        .required(false),
                ),
        )
        .subcommand(
            command!("enqueue")
                .about("Submits seed urls to the scan queue")
                .arg(
                    arg!([URL] ...)
                        .required_unless_present("hosts-file")
                        .help("Seed urls. A missing scheme defaults to https"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of seed urls")
                        .value_parser(value_parser!(std::path::PathBuf)),
                )
                .args(limit_args()),
        )
        .subcommand(
            command!("queue")
                .about("Inspects the scan queue")
                .subcommand_required(true)
                .subcommand(command!("list").about("Lists queued seed urls, oldest first"))
                .subcommand(
                    command!("remove")
                        .about("Removes a seed url from the queue")
                        .arg(arg!(<URL>).help("The queued url")),
                ),
        )
        .subcommand(
            command!("scan")
                .about("Crawls one seed url in the foreground and prints the report")
                .arg(arg!(<URL>).help("The seed url"))
                .args(limit_args())
                .args(crawler_args()),
        )
        .subcommand(
            command!("run")
                .about("Processes the scan queue until interrupted")
                .arg(
                    arg!(--"max-concurrent" <NUM>)
                        .required(false)
                        .help("Maximum number of scans running at once")
                        .env("PAGEWARDEN_MAX_CONCURRENT")
                        .value_parser(value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(--"max-attempts" <NUM>)
                        .required(false)
                        .help("Consecutive failures before a seed url is dropped")
                        .env("PAGEWARDEN_MAX_ATTEMPTS")
                        .value_parser(value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"poll-secs" <SECONDS>)
                        .required(false)
                        .help("Interval between scheduling passes")
                        .env("PAGEWARDEN_POLL_SECS")
                        .value_parser(value_parser!(u64))
                        .default_value("15"),
                )
                .arg(
                    arg!(--"reconcile-secs" <SECONDS>)
                        .required(false)
                        .help("Interval between domain lock reconciliation sweeps")
                        .env("PAGEWARDEN_RECONCILE_SECS")
                        .value_parser(value_parser!(u64))
                        .default_value("120"),
                )
                .arg(
                    arg!(--"retry-backoff-secs" <SECONDS>)
                        .required(false)
                        .help("Delay per consecutive failure before a seed url is retried")
                        .env("PAGEWARDEN_RETRY_BACKOFF_SECS")
                        .value_parser(value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"requeue-discovered")
                        .required(false)
                        .help("Queue links left unvisited at the page cap as new seed urls")
                        .env("PAGEWARDEN_REQUEUE_DISCOVERED")
                        .action(ArgAction::SetTrue),
                )
                .args(crawler_args()),
        )
        .subcommand(
            command!("status")
                .about("Shows recent scans, or the results of one scan")
                .arg(arg!([SCAN_ID]).help("Show this scan's page results"))
                .arg(
                    arg!(-n --"limit" <NUM>)
                        .required(false)
                        .help("Number of recent scans to list")
                        .value_parser(value_parser!(usize))
                        .default_value("10"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tree_is_valid() {
        command_argument_builder().debug_assert();
    }

    #[test]
    fn test_enqueue_accepts_many_urls() {
        let matches = command_argument_builder()
            .try_get_matches_from([
                "pagewarden",
                "enqueue",
                "example.com",
                "https://example.org",
                "--max-pages",
                "5",
            ])
            .unwrap();
        let (_, enqueue) = matches.subcommand().unwrap();
        let urls: Vec<&String> = enqueue.get_many::<String>("URL").unwrap().collect();
        assert_eq!(urls.len(), 2);
        assert_eq!(enqueue.get_one::<usize>("max-pages"), Some(&5));
        assert_eq!(enqueue.get_one::<usize>("max-depth"), Some(&2));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = command_argument_builder()
            .try_get_matches_from(["pagewarden", "status", "-vv", "--db", "/tmp/pw.db"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
        assert_eq!(
            matches.get_one::<String>("db").map(String::as_str),
            Some("/tmp/pw.db")
        );
    }

    #[test]
    fn test_enqueue_requires_a_source() {
        let result = command_argument_builder().try_get_matches_from(["pagewarden", "enqueue"]);
        assert!(result.is_err());
    }
}
