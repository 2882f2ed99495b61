use audit_keeper_cli::{run_cli, CliError};
use tracing::error;

#[tokio::main]
async fn main() {
    // Run CLI and handle errors
    if let Err(e) = run_cli().await {
        error!("CLI error: {:#}", e);
        eprintln!("Error: {:#}", e);

        // Exit with appropriate code based on error type
        let exit_code = match e.downcast_ref::<CliError>() {
            Some(CliError::InvalidArgument { .. }) => 4,
            Some(CliError::Http(_)) => 2,
            Some(CliError::Api { .. }) | Some(CliError::PartialFailure { .. }) => 3,
            Some(CliError::Unhealthy) => 6,
            Some(CliError::Io(_)) | Some(CliError::Output(_)) => 5,
            None => 1,
        };

        std::process::exit(exit_code);
    }
}
