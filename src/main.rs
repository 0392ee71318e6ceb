use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rtrmon::{dial, Client, Event, RtrError, Version};

#[derive(Parser)]
#[command(name = "rtrmon")]
#[command(about = "Monitor the validated ROA feed of an RPKI cache over RTR")]
struct Cli {
    /// RTR cache host name or address
    server: String,
    /// RTR cache TCP port
    port: u16,
    /// Protocol version (0 or 1)
    #[arg(default_value_t = 1)]
    version: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let version = match Version::try_from(cli.version) {
        Ok(version) => version,
        Err(e) => {
            error!(error = %e, "RTR version must be 0 or 1");
            return ExitCode::FAILURE;
        }
    };

    let address = format!("{}:{}", cli.server, cli.port);
    if let Err(e) = monitor(&address, version) {
        error!(error = %e, "problem with RTR server");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn monitor(address: &str, version: Version) -> Result<(), RtrError> {
    dial(address, version, display).await
}

/// Text sink: one line per event, with the timestamp supplied by the
/// subscriber line format and the serial rendered as `unknown` until the
/// first End of Data.
fn display(event: Event, state: Client) {
    let serial = match state.serial_no {
        Some(serial) => serial.to_string(),
        None => "unknown".to_string(),
    };
    match event.new_prefix {
        None => info!("{} (#{})", event.description, serial),
        Some(prefix) => {
            let action = if prefix.announcement {
                "PFX ANNOUNCE"
            } else {
                "PFX WITHDRAW"
            };
            let range = if prefix.length == prefix.max_length {
                prefix.length.to_string()
            } else {
                format!("{}-{}", prefix.length, prefix.max_length)
            };
            info!(
                "{} {}/{} from AS {} (#{})",
                action, prefix.address, range, prefix.asn, serial
            );
        }
    }
}
