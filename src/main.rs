use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use natal_relay::chart::BirthQuery;
use natal_relay::config::{Config, ConfigError};
use natal_relay::logging::init_logger;
use natal_relay::pipeline::{resolver_from_config, PipelineError, ReadingPipeline};

/// Natal Relay: birth data in, chart and streamed interpretation out.
///
/// Examples:
///   natal read --name Neo --date 1989-11-11 --time 11:57 --place Beijing
///   natal read --date 1990-01-01 --time 08:30 --place "New York" -q "Will I travel?"
///   natal resolve Shanghai
///   natal serve --port 3000
#[derive(Parser)]
#[command(name = "natal", version, about, long_about = None)]
struct Cli {
    /// Config file (TOML). Defaults to <config_dir>/natal-relay/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Offline mode: only the built-in city table.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a chart and stream its interpretation to stdout.
    Read(ReadArgs),
    /// Print the coordinate for a place as JSON.
    Resolve { place: String },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

#[derive(Args)]
struct ReadArgs {
    #[arg(long, default_value = "")]
    name: String,

    /// Birth date (YYYY-MM-DD).
    #[arg(long, short = 'd')]
    date: String,

    /// Local birth time (HH:MM).
    #[arg(long, short = 't')]
    time: String,

    #[arg(long, short = 'p')]
    place: String,

    #[arg(long, short = 'q', default_value = "")]
    question: String,

    /// Where to write the chart image.
    #[arg(long, short = 'o', default_value = "chart.svg")]
    out: PathBuf,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("invalid {field} '{value}': {reason}")]
    Input { field: &'static str, value: String, reason: String },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.geo.offline |= cli.offline;

    match cli.command {
        Command::Read(args) => read(&config, args),
        Command::Resolve { place } => {
            let coord = resolver_from_config(&config.geo)
                .resolve(&place)
                .map_err(|e| CliError::Pipeline(e.into()))?;
            eprintln!("  {}", coord.display_line());
            println!("{}", serde_json::to_string_pretty(&coord).map_err(std::io::Error::other)?);
            Ok(())
        }
        Command::Serve { host, port } => {
            let pipeline = ReadingPipeline::from_config(&config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(natal_relay::server::start(&host, port, pipeline))?;
            Ok(())
        }
    }
}

fn read(config: &Config, args: ReadArgs) -> Result<(), CliError> {
    let pipeline = ReadingPipeline::from_config(config)?;
    let query = birth_query(&args)?;

    let reading = pipeline.run(&query, &args.question)?;
    std::fs::write(&args.out, &reading.artifact.content)?;

    eprintln!("  {}", reading.coordinate.display_line());
    for (body, sign) in reading.facts.iter() {
        eprintln!("  {:<10} {}", body, sign);
    }
    eprintln!("  chart written to {}", args.out.display());
    eprintln!();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for fragment in reading.interpretation {
        match fragment {
            Ok(text) => {
                out.write_all(text.as_bytes())?;
                out.flush()?;
            }
            Err(e) => {
                writeln!(out)?;
                return Err(PipelineError::Interpretation(e).into());
            }
        }
    }
    writeln!(out)?;
    Ok(())
}

fn birth_query(args: &ReadArgs) -> Result<BirthQuery, CliError> {
    let date = NaiveDate::parse_from_str(args.date.trim(), "%Y-%m-%d").map_err(|e| CliError::Input {
        field: "date",
        value: args.date.clone(),
        reason: e.to_string(),
    })?;
    let time = NaiveTime::parse_from_str(args.time.trim(), "%H:%M").map_err(|e| CliError::Input {
        field: "time",
        value: args.time.clone(),
        reason: e.to_string(),
    })?;

    Ok(BirthQuery {
        display_name: args.name.clone(),
        year: date.year(),
        month: date.month(),
        day: date.day(),
        hour: time.hour(),
        minute: time.minute(),
        place: args.place.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(date: &str, time: &str) -> ReadArgs {
        ReadArgs {
            name: "Neo".into(),
            date: date.into(),
            time: time.into(),
            place: "Beijing".into(),
            question: String::new(),
            out: PathBuf::from("chart.svg"),
        }
    }

    #[test]
    fn test_birth_query_from_date_and_time() {
        let query = birth_query(&args(" 1989-11-11 ", "07:05")).unwrap();
        assert_eq!((query.year, query.month, query.day), (1989, 11, 11));
        assert_eq!((query.hour, query.minute), (7, 5));
        assert_eq!(query.display_name, "Neo");
        assert_eq!(query.place, "Beijing");
    }

    #[test]
    fn test_birth_query_rejects_bad_date() {
        let err = birth_query(&args("1989-02-30", "11:57")).unwrap_err();
        assert!(matches!(err, CliError::Input { field: "date", .. }));
        assert!(err.to_string().contains("1989-02-30"));
    }

    #[test]
    fn test_birth_query_rejects_bad_time() {
        assert!(matches!(birth_query(&args("1989-11-11", "25:00")), Err(CliError::Input { field: "time", .. })));
        assert!(matches!(birth_query(&args("1989-11-11", "noon")), Err(CliError::Input { field: "time", .. })));
    }

    #[test]
    fn test_cli_parses_read_subcommand() {
        let cli = Cli::try_parse_from([
            "natal", "--offline", "read", "--date", "1989-11-11", "--time", "11:57", "--place", "Beijing",
        ])
        .unwrap();
        assert!(cli.offline);
        match cli.command {
            Command::Read(read) => {
                assert_eq!(read.out, PathBuf::from("chart.svg"));
                assert!(read.question.is_empty());
            }
            _ => panic!("expected read"),
        }
    }
}
