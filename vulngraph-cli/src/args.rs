use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand};
use vulngraph_core::StageId;

/// vulngraph: map vulnerability-management data into an entity graph
#[derive(Parser, Debug)]
#[command(name = "vulngraph", version, about = "Vulnerability data to entity graph ingestion")]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Vendor API base URL (overrides the config file)
    #[arg(long = "api-url", value_name = "URL")]
    pub api_url: Option<String>,

    /// API user name (overrides the config file)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Only include scans processed after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long = "min-scanned-since", value_name = "TIME", value_parser = parse_timestamp)]
    pub min_scanned_since: Option<DateTime<Utc>>,

    /// Only include scans processed before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long = "max-scanned-since", value_name = "TIME", value_parser = parse_timestamp)]
    pub max_scanned_since: Option<DateTime<Utc>>,

    /// Also map findings onto CVE vulnerabilities
    #[arg(long = "include-cves")]
    pub include_cves: bool,

    /// Job state database (default: ~/.vulngraph/jobstate.db)
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Increase verbosity level (use -v, -vv or -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the ingestion pipeline
    Run {
        /// Write the collected graph to this JSON file
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,

        /// Run only these stages (comma-separated, e.g. fetch-account,fetch-hosts)
        #[arg(long, value_delimiter = ',', value_parser = parse_stage)]
        stages: Vec<StageId>,

        /// Keep job state from the previous run instead of clearing it
        #[arg(long)]
        keep_state: bool,
    },
    /// Fetch one page of each core resource and print counts
    Probe,
    /// Write the graph left by the last run to a JSON file
    Export {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn parse_stage(value: &str) -> Result<StageId, String> {
    StageId::parse(value.trim()).ok_or_else(|| {
        let known: Vec<&str> = StageId::ALL.iter().map(StageId::as_str).collect();
        format!("unknown stage '{value}' (expected one of: {})", known.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_with_stage_list() {
        let args = Args::try_parse_from([
            "vulngraph",
            "-vv",
            "--min-scanned-since",
            "2024-01-01",
            "run",
            "--stages",
            "fetch-account,fetch-hosts",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(
            args.min_scanned_since,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        let Command::Run { stages, export, keep_state } = args.command else {
            panic!("expected run");
        };
        assert_eq!(stages, [StageId::Account, StageId::Hosts]);
        assert!(export.is_none());
        assert!(!keep_state);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = Args::try_parse_from(["vulngraph", "run", "--stages", "fetch-everything"])
            .unwrap_err();
        assert!(err.to_string().contains("unknown stage"));
    }

    #[test]
    fn rfc3339_timestamps_keep_their_offset() {
        let ts = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
