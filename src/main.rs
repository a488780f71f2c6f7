use anyhow::Context;
use assetline::{Config, deploy, pipeline};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Project folder containing `src/` and an optional `assetline.toml`.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Log debug messages.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Clean production build of every asset category.
    Build,
    /// Development build, then serve `dist` and rebuild on changes.
    Serve,
    /// Serve the existing `dist` folder without building.
    Start,
    /// Remove the `dist` folder.
    Clear,
    /// Development build of the scripts only.
    DevJs,
    /// Publish `dist` to the configured git remote.
    Deploy,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    assetline::init_logging(args.verbose).context("Failed to set logging subscriber")?;

    let config = Config::load(&args.root)?;

    match args.command {
        Command::Build => pipeline::build(&config)?,
        Command::Serve => pipeline::serve(&config)?,
        Command::Start => pipeline::start(&config)?,
        Command::Clear => pipeline::clear(&config)?,
        Command::DevJs => pipeline::dev_js(&config)?,
        Command::Deploy => deploy::deploy(&config)?,
    }

    Ok(())
}
