use std::process::ExitCode;

use clap::Parser;

mod commands;

use commands::Command;

#[derive(Parser, Debug)]
#[command(author, version, about = "Shared pantry tracker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    pantry::init_tracing();

    let args = Args::parse();

    match commands::run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_silent() => {
            println!("Not in a pantry group, create or join one first.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_transient() {
                eprintln!("The store could not be reached, try again.");
            } else if e.is_not_found() {
                eprintln!("Another member may have removed it, list again to see the current pantry.");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_negative_quantity_reaches_validation() {
        let args = Args::try_parse_from(["pantry-tracker", "item", "add", "Rice", "-1"]).unwrap();

        assert!(matches!(
            args.command,
            Command::Item(commands::ItemCommand::Add { quantity: -1, .. })
        ));
    }
}
