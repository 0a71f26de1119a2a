use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("catwalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("catwalk")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Writes a default configuration and creates the product cache")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory for catwalk.json and cache.db")
                        .default_value("~/.config/catwalk/"),
                )
                .arg(
                    arg!(-f - -"force")
                        .help(
                            "Overwrite an existing configuration and start with an empty \
                        cache.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("tree")
                .about("Discover and print the category tree of a catalogue")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("Root URL of the catalogue")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("Configuration file (default: ~/.config/catwalk/catwalk.json)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"retries" <NUM>)
                        .required(false)
                        .help("Retries for transient fetch failures")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                ),
        )
        .subcommand(
            command!("run")
                .about(
                    "Crawl categories, collect product URLs, extract product data and write a \
                QC'd dataset.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("Root URL of the catalogue")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of async workers fetching product pages")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(--"retries" <NUM>)
                        .required(false)
                        .help("Retries for transient fetch failures")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"base-delay" <MS>)
                        .required(false)
                        .help("Base backoff delay in milliseconds, doubled per retry")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("500"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(true)
                        .help("Report file; .txt writes a text report, anything else JSON")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"use-cache")
                        .required(false)
                        .help("Skip extraction for products whose page has not changed")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("Configuration file (default: ~/.config/catwalk/catwalk.json)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"cache-path" <PATH>)
                        .required(false)
                        .help("SQLite cache file (default: ~/.config/catwalk/cache.db)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
