//! Command-line interface handling for the Harbor CLI.

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    pub command: CliCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    CreateServer(CreateArgs),
    ListServers,
    ListCompositions { game: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateArgs {
    pub name: String,
    pub game: String,
    pub version: Option<String>,
    pub image: Option<String>,
    /// Requested compositions, in application order
    pub compositions: Vec<String>,
    /// Take every prompt's default instead of reading stdin
    pub no_input: bool,
}

fn command() -> Command {
    Command::new("harbor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Provision and configure containerized game servers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("harbor.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("server")
                .about("Manage game servers")
                .subcommand_required(true)
                .subcommand(
                    Command::new("create")
                        .about("Create a server and apply compositions to it")
                        .disable_version_flag(true)
                        .arg(Arg::new("name").short('n').long("name").value_name("NAME").required(true))
                        .arg(Arg::new("game").short('g').long("game").value_name("GAME").required(true))
                        .arg(Arg::new("game-version").long("version").value_name("VERSION"))
                        .arg(Arg::new("image").long("image").value_name("IMAGE"))
                        .arg(
                            Arg::new("with")
                                .short('w')
                                .long("with")
                                .value_name("COMPOSITIONS")
                                .help("Comma-separated compositions to apply, in order")
                                .value_delimiter(',')
                                .action(ArgAction::Append),
                        )
                        .arg(
                            Arg::new("no-input")
                                .long("no-input")
                                .help("Never prompt; use defaults for every question")
                                .action(ArgAction::SetTrue),
                        ),
                )
                .subcommand(Command::new("ls").about("List known servers")),
        )
        .subcommand(
            Command::new("compositions")
                .about("List compositions available for a game")
                .arg(Arg::new("game").short('g').long("game").value_name("GAME").required(true)),
        )
}

fn required(matches: &ArgMatches, id: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument --{id}"))
}

impl CliArgs {
    /// Parses the process arguments, exiting with clap's usage message on
    /// invalid input.
    pub fn parse() -> anyhow::Result<Self> {
        Self::from_matches(&command().get_matches())
    }

    pub fn try_parse_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_matches(&command().try_get_matches_from(args)?)
    }

    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let command = match matches.subcommand() {
            Some(("server", server)) => match server.subcommand() {
                Some(("create", create)) => CliCommand::CreateServer(CreateArgs {
                    name: required(create, "name")?,
                    game: required(create, "game")?,
                    version: create.get_one::<String>("game-version").cloned(),
                    image: create.get_one::<String>("image").cloned(),
                    compositions: create
                        .get_many::<String>("with")
                        .map(|values| {
                            values
                                .map(|value| value.trim().to_string())
                                .filter(|value| !value.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                    no_input: create.get_flag("no-input"),
                }),
                Some(("ls", _)) => CliCommand::ListServers,
                _ => anyhow::bail!("unknown server command"),
            },
            Some(("compositions", compositions)) => CliCommand::ListCompositions {
                game: required(compositions, "game")?,
            },
            _ => anyhow::bail!("no command given"),
        };

        Ok(Self {
            config_path: PathBuf::from(required(matches, "config")?),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            command,
        })
    }
}
