use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use scrutinio::config::AppConfig;
use scrutinio::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Scrutinio",
    about = "Run class grading sessions over HTTP or walk through a scripted session",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Drive the demo class through a complete grading session
    Demo(DemoArgs),
}

/// Flags layered over the environment configuration.
#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Folder receiving generated minutes and summaries
    #[arg(long)]
    pub(crate) documents_dir: Option<PathBuf>,
    /// Start year of the school calendar, e.g. 2024 for 2024/25
    #[arg(long)]
    pub(crate) school_year: Option<i32>,
}

impl ServeArgs {
    pub(crate) fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = self.documents_dir {
            config.documents.root = root;
        }
        if self.school_year.is_some() {
            config.grading.school_year = self.school_year;
        }
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    match Cli::parse().command {
        Some(Command::Demo(args)) => run_demo(args),
        Some(Command::Serve(args)) => server::run(args).await,
        None => server::run(ServeArgs::default()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_override_loaded_config() {
        let cli = Cli::try_parse_from([
            "scrutinio",
            "serve",
            "--port",
            "8081",
            "--documents-dir",
            "/tmp/scrutini",
            "--school-year",
            "2023",
        ])
        .expect("arguments parse");
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };

        let mut config = AppConfig::load().expect("config loads");
        let host = config.server.host.clone();
        args.apply(&mut config);

        assert_eq!(config.server.host, host);
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.documents.root, PathBuf::from("/tmp/scrutini"));
        assert_eq!(config.grading.school_year, Some(2023));
    }

    #[test]
    fn missing_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["scrutinio"]).expect("arguments parse");
        assert!(cli.command.is_none());
    }
}
