use anyhow::Context;
use docqa::cli::{commands, output::Output, Cli};
use docqa::utils::logging::init_tracing;
use docqa::DocqaConfig;

#[tokio::main]
async fn main() {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    if let Err(e) = run(cli, &output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let mut config = DocqaConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging)?;

    tracing::debug!(index_dir = %config.index_dir().display(), "Configuration loaded");

    commands::run(cli.command, &config, output).await?;
    Ok(())
}
