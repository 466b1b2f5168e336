use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::Commands;

#[derive(Parser)]
#[command(name = "bakeshift", version)]
#[command(about = "Bake animated scenes for package and compositor export", long_about = None)]
struct Cli {
    /// Conversion settings (JSON); missing fields use defaults
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let settings = commands::load_settings(cli.settings.as_deref())?;
    cli.command.execute(&settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_compositor_nodes() {
        let cli = Cli::try_parse_from([
            "bakeshift",
            "compositor",
            "shot.json",
            "-o",
            "keys.json",
            "--nodes",
            "cam,null",
        ])
        .unwrap();
        match cli.command {
            Commands::Compositor { nodes, .. } => assert_eq!(nodes, vec!["cam", "null"]),
            _ => panic!("expected the compositor command"),
        }
    }
}
