use std::io::{BufRead, Write};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::{self, ConfigError};
use crate::contract::SnapshotDto;
use crate::core_service::{CoreService, ServiceError};
use crate::logging;
use crate::transport::handle_json;

const USAGE: &str = "usage: launchsearch-core [--config <path>] [--query <text>] [--verbose]";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Usage(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Without `query`, the process serves JSON lines on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: Option<PathBuf>,
    pub query: Option<String>,
    pub verbose: bool,
}

pub fn parse_cli_args(args: &[String]) -> Result<CliOptions, RuntimeError> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = iter
                    .next()
                    .ok_or_else(|| RuntimeError::Usage(format!("--config needs a path\n{USAGE}")))?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--query" | "-q" => {
                let value = iter
                    .next()
                    .ok_or_else(|| RuntimeError::Usage(format!("--query needs text\n{USAGE}")))?;
                options.query = Some(value.clone());
            }
            "--verbose" | "-v" => options.verbose = true,
            "--help" | "-h" => return Err(RuntimeError::Usage(USAGE.to_string())),
            other => {
                return Err(RuntimeError::Usage(format!(
                    "unknown argument '{other}'\n{USAGE}"
                )))
            }
        }
    }
    Ok(options)
}

pub fn run_with_options(options: CliOptions) -> Result<(), RuntimeError> {
    let mut config = config::load(options.config_path.as_deref())?;
    if options.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Err(error) = logging::init(&config.logging) {
        eprintln!("[launchsearch-core] logging unavailable: {error}");
    }

    if !config.config_path.exists() {
        config::save(&config)?;
        info!(path = %config.config_path.display(), "wrote default config");
    }
    info!(
        config_path = %config.config_path.display(),
        preferences_db_path = %config.preferences_db_path.display(),
        file_roots = config.file_roots.len(),
        "startup"
    );

    let mut service = CoreService::from_config(config)?;

    match options.query {
        Some(query) => {
            let snapshot = SnapshotDto::from(service.query(&query));
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            let handled = serve(&mut service, stdin.lock(), stdout.lock())?;
            info!(requests = handled, "input closed; shutting down");
            Ok(())
        }
    }
}

/// Answers one JSON request per input line until the reader is exhausted.
pub fn serve<R, W>(service: &mut CoreService, reader: R, mut writer: W) -> Result<usize, RuntimeError>
where
    R: BufRead,
    W: Write,
{
    let mut handled = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_json(service, &line);
        writeln!(writer, "{response}")?;
        writer.flush()?;
        handled += 1;
        debug!(handled, "request answered");
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::{parse_cli_args, CliOptions, RuntimeError};
    use std::path::PathBuf;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_query_and_config() {
        let options = parse_cli_args(&args(&["--config", "/tmp/ls.toml", "-q", "maps", "-v"]))
            .expect("args should parse");
        assert_eq!(options.config_path, Some(PathBuf::from("/tmp/ls.toml")));
        assert_eq!(options.query.as_deref(), Some("maps"));
        assert!(options.verbose);
    }

    #[test]
    fn no_arguments_means_serve_mode() {
        let options = parse_cli_args(&[]).expect("empty args should parse");
        assert_eq!(options, CliOptions::default());
        assert!(options.query.is_none());
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(matches!(
            parse_cli_args(&args(&["--frobnicate"])),
            Err(RuntimeError::Usage(_))
        ));
        assert!(matches!(
            parse_cli_args(&args(&["--serve"])),
            Err(RuntimeError::Usage(_))
        ));
        assert!(matches!(
            parse_cli_args(&args(&["--config"])),
            Err(RuntimeError::Usage(_))
        ));
    }
}
