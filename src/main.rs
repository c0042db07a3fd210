use anyhow::Context;
use env_logger::Builder as LoggerBuilder;
use log::LevelFilter;
use std::env;
use std::path::PathBuf;
use tally::album_store::AlbumStore;
use tally::config::{self, DataDir, Settings};
use tally::engine::Aggregator;
use tally::history::History;
use tally::lastfm::LastfmClient;
use tally::persist::{self, StateError};
use tally::spotify::SpotifyCatalog;
use tally::stats;

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    verbosity: i8,
    data_dir: Option<PathBuf>,
    report_only: bool,
    positional: Vec<String>,
}

enum Command {
    Aggregate {
        lastfm_username: String,
        lastfm_password: String,
        spotify_username: String,
    },
    Report {
        lastfm_username: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            eprint!("{}", usage());
            std::process::exit(2);
        }
    };
    let command = match command_from(&args) {
        Some(command) => command,
        None => {
            eprint!("{}", usage());
            std::process::exit(2);
        }
    };

    init_logger(args.verbosity);
    let data_dir = DataDir::new(config::data_root(args.data_dir.as_deref())?);

    match command {
        Command::Report { lastfm_username } => report(&data_dir, &lastfm_username),
        Command::Aggregate {
            lastfm_username,
            lastfm_password,
            spotify_username,
        } => aggregate(
            data_dir,
            &lastfm_username,
            &lastfm_password,
            &spotify_username,
        ),
    }
}

fn aggregate(
    data_dir: DataDir,
    lastfm_username: &str,
    lastfm_password: &str,
    spotify_username: &str,
) -> anyhow::Result<()> {
    let settings = Settings::load(&data_dir.settings_path())?.with_env_overrides();

    let mut lastfm = LastfmClient::new(settings.lastfm()?);
    lastfm
        .authenticate(lastfm_username, lastfm_password)
        .context("could not sign in to Last.fm")?;
    let catalog = SpotifyCatalog::connect(
        settings.spotify()?,
        data_dir.spotify_token_path(spotify_username),
    )
    .with_context(|| format!("could not get a Spotify token for {spotify_username}"))?;

    let plays = lastfm.recent_plays(lastfm_username)?;
    let mut aggregator = Aggregator::new(catalog, data_dir);
    let store = aggregator.aggregate(lastfm_username, plays)?;

    stats::print_report(lastfm_username, &store);
    Ok(())
}

fn report(data_dir: &DataDir, lastfm_username: &str) -> anyhow::Result<()> {
    let path = data_dir.albums_path(lastfm_username);
    let store = match persist::read_state(&path, AlbumStore::deserialize) {
        Ok(store) => store,
        Err(StateError::Missing { .. }) => anyhow::bail!(
            "no saved albums for {lastfm_username}; run an aggregation first"
        ),
        Err(err) => return Err(err.into()),
    };
    stats::print_report(lastfm_username, &store);
    Ok(())
}

fn init_logger(verbosity: i8) {
    let level = match verbosity {
        i8::MIN..=-1 => LevelFilter::Warn,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = LoggerBuilder::new();
    builder.filter_level(level);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "-v" | "--verbose" => out.verbosity = out.verbosity.saturating_add(1),
            "-q" | "--quiet" => out.verbosity = out.verbosity.saturating_sub(1),
            "--report" => out.report_only = true,
            "--data-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--data-dir requires a path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--data-dir cannot be empty");
                }
                out.data_dir = Some(PathBuf::from(value));
            }
            "-h" | "--help" => {
                print!("{}", usage());
                std::process::exit(0);
            }
            other if other.starts_with('-') && other.len() > 1 => {
                anyhow::bail!("unknown argument {other}")
            }
            other => out.positional.push(other.to_string()),
        }
        index += 1;
    }
    Ok(out)
}

fn command_from(args: &CliArgs) -> Option<Command> {
    match (args.report_only, args.positional.as_slice()) {
        (true, [username]) => Some(Command::Report {
            lastfm_username: username.clone(),
        }),
        (false, [username, password, spotify]) => Some(Command::Aggregate {
            lastfm_username: username.clone(),
            lastfm_password: password.clone(),
            spotify_username: spotify.clone(),
        }),
        _ => None,
    }
}

fn usage() -> String {
    String::from(
        "Usage: tally [options] <lastfm_username> <lastfm_password> <spotify_username>\n\
         \x20      tally [options] --report <lastfm_username>\n\
         \n\
         Options:\n\
         \x20 -v, --verbose       More log output (repeatable)\n\
         \x20 -q, --quiet         Only warnings and errors\n\
         \x20 --data-dir DIR      Where albums and caches are kept\n\
         \x20 --report            Print stats from saved albums without going online\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn three_positionals_aggregate() {
        let parsed = parse_args(args(&["-v", "alice", "secret", "alice_sp"])).expect("parse");
        assert_eq!(parsed.verbosity, 1);
        assert!(matches!(
            command_from(&parsed),
            Some(Command::Aggregate { ref spotify_username, .. }) if spotify_username == "alice_sp"
        ));
    }

    #[test]
    fn wrong_positional_count_has_no_command() {
        let parsed = parse_args(args(&["alice", "secret"])).expect("parse");
        assert!(command_from(&parsed).is_none());
        let parsed = parse_args(args(&["--report", "alice", "extra"])).expect("parse");
        assert!(command_from(&parsed).is_none());
    }

    #[test]
    fn report_needs_only_username() {
        let parsed =
            parse_args(args(&["--data-dir", "/tmp/t", "--report", "alice"])).expect("parse");
        assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/t")));
        assert!(matches!(
            command_from(&parsed),
            Some(Command::Report { ref lastfm_username }) if lastfm_username == "alice"
        ));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse_args(args(&["--bogus"])).is_err());
        assert!(parse_args(args(&["--data-dir"])).is_err());
    }
}
