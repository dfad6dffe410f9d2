//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvest_core::HarvestConfig;

/// Persist media from URLs or a manifest into a directory.
///
/// Inputs are plain `http(s)://` URLs, free text containing URLs, or JSON
/// lines `{"url": ..., "name": ..., "metadata": {...}}`. With no inputs and
/// no `--input` file, lines are read from stdin.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// URLs or manifest lines to harvest
    pub inputs: Vec<String>,

    /// Read manifest lines from a file
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Destination directory for artifacts
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Retry attempts after the first failure (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub retries: Option<u8>,

    /// Seconds without received bytes before a transfer is abandoned
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub stall_timeout: Option<u64>,

    /// Pending+active load at which discovery pauses
    #[arg(long, value_name = "N")]
    pub high_watermark: Option<usize>,

    /// Load below which paused discovery resumes
    #[arg(long, value_name = "N")]
    pub low_watermark: Option<usize>,

    /// Skip exiftool/ffmpeg metadata embedding
    #[arg(long)]
    pub no_metadata: bool,

    /// Seconds one exiftool/ffmpeg run may take
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub tool_timeout: Option<u64>,

    /// Extra request header, repeatable (e.g. "Cookie: session=abc")
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Config file (defaults to $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Layers explicitly given flags over `config`.
    pub fn apply_to(&self, config: &mut HarvestConfig) {
        if let Some(dir) = &self.output_dir {
            config.destination_dir.clone_from(dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency_limit = usize::from(concurrency);
        }
        if let Some(retries) = self.retries {
            config.download_retries = u32::from(retries);
        }
        if let Some(secs) = self.stall_timeout {
            config.stall_timeout_secs = secs;
        }
        if let Some(high) = self.high_watermark {
            config.high_watermark = high;
        }
        if let Some(low) = self.low_watermark {
            config.low_watermark = low;
        }
        if self.no_metadata {
            config.embed_metadata = false;
        }
        if let Some(secs) = self.tool_timeout {
            config.tool_timeout_secs = secs;
        }
        for (name, value) in &self.headers {
            config.headers.insert(name.clone(), value.clone());
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.inputs.is_empty());
        assert!(args.concurrency.is_none());
        assert!(!args.no_metadata);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_positional_inputs_collected() {
        let args =
            Args::try_parse_from(["harvester", "https://a.example/1.jpg", "https://b.example/2"])
                .unwrap();
        assert_eq!(args.inputs.len(), 2);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let err = Args::try_parse_from(["harvester", "-c", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Args::try_parse_from(["harvester", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_retries_over_max_rejected() {
        let err = Args::try_parse_from(["harvester", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_header_parsed_into_pair() {
        let args = Args::try_parse_from(["harvester", "--header", "Cookie:  sid=abc "]).unwrap();
        assert_eq!(
            args.headers,
            vec![("Cookie".to_string(), "sid=abc".to_string())]
        );
    }

    #[test]
    fn test_cli_header_without_colon_rejected() {
        assert!(Args::try_parse_from(["harvester", "--header", "Cookie"]).is_err());
    }

    #[test]
    fn test_cli_apply_overrides_only_given_flags() {
        let args = Args::try_parse_from([
            "harvester",
            "-o",
            "out",
            "-c",
            "8",
            "--low-watermark",
            "2",
            "--no-metadata",
            "-H",
            "Referer: https://site.example/",
        ])
        .unwrap();
        let mut config = HarvestConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.destination_dir, PathBuf::from("out"));
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.low_watermark, 2);
        assert_eq!(
            config.high_watermark,
            HarvestConfig::default().high_watermark
        );
        assert!(!config.embed_metadata);
        assert_eq!(
            config.headers.get("Referer").map(String::as_str),
            Some("https://site.example/")
        );
    }

    #[test]
    fn test_cli_tool_timeout_overrides_config() {
        let args = Args::try_parse_from(["harvester", "--tool-timeout", "45"]).unwrap();
        let mut config = HarvestConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.tool_timeout_secs, 45);

        let result = Args::try_parse_from(["harvester", "--tool-timeout", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
