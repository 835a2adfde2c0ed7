use clap::Parser;
use sbx_cli::cli::Cli;
use sbx_cli::context::CommandContext;
use sbx_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	if let Err(err) = logging::init_logging(cli.verbose) {
		eprintln!("failed to initialize logging: {err}");
	}

	let ctx = match CommandContext::new(cli.base_url.as_deref(), cli.api_key.clone(), cli.no_proxy_tls) {
		Ok(ctx) => ctx,
		Err(err) => {
			error!(target = "sbx", error = %err, "invalid configuration");
			commands::print_failure(cli.command.name(), &err);
			std::process::exit(2);
		}
	};

	if let Err(err) = commands::dispatch(cli.command, &ctx).await {
		error!(target = "sbx", error = %err, "command failed");
		std::process::exit(1);
	}
}
