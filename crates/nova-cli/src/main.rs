//! Nova CLI entry point

use clap::Parser;
use nova_cli::{
    cli::{Cli, Commands},
    commands::{
        AuthorizeUrlCommand, InspectCommand, KeygenCommand, MigrateCommand, RotateKeysCommand,
    },
    context::{load_settings, NovaContext},
    error::CliResult,
    utils::{init_tracing, ColoredOutput},
};
use tracing::info;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", ColoredOutput::error("Error:"), e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    info!("Nova CLI v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Keygen => {
            KeygenCommand::run();
            Ok(())
        }

        Commands::Migrate => {
            let settings = load_settings(&cli)?;
            MigrateCommand::run(&settings.database_url).await.map(|_| ())
        }

        Commands::RotateKeys { dry_run } => {
            let mut settings = load_settings(&cli)?;
            // Rotation writes explicitly; reads must not race it.
            settings.ratchet_on_read = false;
            let ctx = NovaContext::open(settings).await?;
            RotateKeysCommand::run(&ctx, *dry_run).await.map(|_| ())
        }

        Commands::Inspect { user } => {
            let mut settings = load_settings(&cli)?;
            settings.ratchet_on_read = false;
            let ctx = NovaContext::open(settings).await?;
            InspectCommand::run(&ctx, user).await.map(|_| ())
        }

        Commands::AuthorizeUrl {
            user,
            connector,
            return_to,
        } => {
            let ctx = NovaContext::open(load_settings(&cli)?).await?;
            AuthorizeUrlCommand::run(&ctx, user, connector, return_to)
                .await
                .map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotate_keys() {
        let cli = Cli::try_parse_from(["nova", "rotate-keys", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::RotateKeys { dry_run: true }));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nova",
            "inspect",
            "--user",
            "u1",
            "--database-url",
            "sqlite::memory:",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));
        match cli.command {
            Commands::Inspect { user } => assert_eq!(user, "u1"),
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn test_authorize_url_defaults_return_path() {
        let cli =
            Cli::try_parse_from(["nova", "authorize-url", "--user", "u1", "--connector", "mail"])
                .unwrap();
        match cli.command {
            Commands::AuthorizeUrl { return_to, .. } => {
                assert_eq!(return_to, "/settings/connectors")
            }
            _ => panic!("expected authorize-url"),
        }
    }

    #[test]
    fn test_missing_required_argument_fails() {
        assert!(Cli::try_parse_from(["nova", "inspect"]).is_err());
    }
}
