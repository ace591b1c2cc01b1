use std::path::PathBuf;

use clap::Parser;

/// Lily Discord adapter: bridges the platform client and the Lily backend.
#[derive(Parser, Debug)]
#[command(name = "lily-discord-adapter", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, env = "LILY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Print the effective config as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "lily-discord-adapter",
            "--config",
            "/etc/lily/adapter.toml",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/lily/adapter.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(!args.print_config);
    }
}
