use clap::Parser;
use leaderboard::{get_settings_with_cli, setup_logger, Application, Cli, Settings};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings: Settings = get_settings_with_cli((&cli).into())?;
    setup_logger(settings.level.clone(), vec![String::from("hyper")])?;
    let application = Application::build(settings)?;

    application.run(cli.command)
}
