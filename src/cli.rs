// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{App, AppSettings, Arg, ArgMatches, SubCommand},
    debbase::{builder, cache::DiskCache, recipe::Recipe, repository::http::HttpClient},
    std::{path::PathBuf, sync::Arc},
    thiserror::Error,
    tokio_util::sync::CancellationToken,
};

const BUILD_ABOUT: &str = "\
Build Debian base filesystem artifacts from a recipe.

The recipe is a YAML document declaring apt repositories (with the keys
that sign them), packages to include or exclude, and users/groups:

sources (list)
   Apt repositories to fetch packages from. Each entry has `url`,
   `signedBy` (an HTTPS URL or file path to an armored keyring),
   and optionally `distribution` and `components`.

packages (object)
   `include` lists packages to install, each `name` or `name=version`.
   `exclude` lists packages to keep out of the selection.

options (object)
   `omitRequired` disables the automatic installation of packages with
   priority `required`.

The output directory receives the uncompressed package data archives and
a `dpkg.tar` holding the synthetic dpkg database, ready for a downstream
image builder.
";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Build(#[from] debbase::error::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

pub async fn run_cli() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = App::new("debbase")
        .setting(AppSettings::ArgRequiredElseHelp)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative Debian base filesystem builder");

    let app = app.arg(
        Arg::with_name("cache-dir")
            .long("--cache-dir")
            .takes_value(true)
            .global(true)
            .help("Directory for the HTTP response cache"),
    );

    let app = app.subcommand(
        SubCommand::with_name("build")
            .about("Build the filesystem artifacts described by a recipe")
            .long_about(BUILD_ABOUT)
            .arg(
                Arg::with_name("filename")
                    .long("--filename")
                    .short("f")
                    .takes_value(true)
                    .required(true)
                    .help("Recipe file to use"),
            )
            .arg(
                Arg::with_name("arch")
                    .long("--arch")
                    .short("a")
                    .takes_value(true)
                    .default_value("amd64")
                    .help("Target architecture (e.g. amd64, arm64)"),
            )
            .arg(
                Arg::with_name("output")
                    .long("--output")
                    .short("o")
                    .takes_value(true)
                    .default_value("build")
                    .help("Directory to place the build artifacts in"),
            ),
    );

    let matches = app.get_matches();

    match matches.subcommand() {
        ("build", Some(args)) => command_build(args).await,
        (command, _) => Err(CliError::InvalidSubCommand(command.to_string())),
    }
}

async fn command_build(args: &ArgMatches<'_>) -> Result<()> {
    let recipe_path = args
        .value_of_os("filename")
        .expect("filename argument is required");
    let arch = args.value_of("arch").expect("arch has a default value");
    let output = PathBuf::from(args.value_of_os("output").expect("output has a default value"));

    let recipe = Recipe::from_yaml(std::fs::File::open(recipe_path)?)?;

    let cache = match args.value_of_os("cache-dir") {
        Some(dir) => Some(Arc::new(DiskCache::new(dir, "http")?)),
        None => None,
    };

    let cancel = CancellationToken::new();
    let http = HttpClient::new(cache, cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    std::fs::create_dir_all(&output)?;

    let artifacts = builder::build_platform(&http, &recipe, arch, &output).await?;

    println!("dpkg database: {}", artifacts.dpkg_database_archive.display());
    for path in &artifacts.data_archives {
        println!("data archive: {}", path.display());
    }
    println!(
        "source date epoch: {}",
        artifacts.source_date_epoch.timestamp()
    );

    Ok(())
}
