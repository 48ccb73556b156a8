use clap::Parser;
use std::path::PathBuf;

/// Maestro - chat with a team of specialized LLM agents
#[derive(Parser, Debug, Clone)]
#[command(name = "maestro", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "MAESTRO_CONFIG", default_value = "maestro.toml")]
    pub config: PathBuf,

    /// Session identifier used for rate limiting
    #[arg(short, long, env = "MAESTRO_SESSION", default_value = "default")]
    pub session: String,

    /// Print whole responses instead of streaming them
    #[arg(long)]
    pub no_stream: bool,

    /// Conversation history file (overrides `memory.history_file`)
    #[arg(long, env = "MAESTRO_HISTORY_FILE")]
    pub history_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["maestro"]);
        assert_eq!(cli.config, PathBuf::from("maestro.toml"));
        assert_eq!(cli.session, "default");
        assert!(!cli.no_stream);
        assert!(cli.history_file.is_none());
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "maestro",
            "--config",
            "custom.toml",
            "-s",
            "alice",
            "--no-stream",
            "--history-file",
            "/tmp/history.json",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.session, "alice");
        assert!(cli.no_stream);
        assert_eq!(cli.history_file, Some(PathBuf::from("/tmp/history.json")));
    }
}
