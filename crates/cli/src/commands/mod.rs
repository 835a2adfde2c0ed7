mod lifecycle;
mod status;
mod tunnel;
mod wait;

use std::time::Duration;

use serde::Serialize;

use crate::cli::Commands;
use crate::context::CommandContext;
use crate::error::{CliError, Result};
use crate::output::{CommandResult, ResultBuilder, print_result};

pub async fn dispatch(command: Commands, ctx: &CommandContext) -> Result<()> {
	let name = command.name();
	match command {
		Commands::Status { job } => report(ResultBuilder::new(name), status::run(ctx, job.ids()).await),
		Commands::Wait { job, timeout } => report(ResultBuilder::new(name), wait::run(ctx, job.ids(), Duration::from_secs(timeout)).await),
		Commands::Tunnel {
			job,
			dest_port,
			local_port,
			timeout,
			release,
		} => {
			let args = tunnel::TunnelArgs {
				dest_port,
				local_port,
				timeout: Duration::from_secs(timeout),
				release,
			};
			tunnel::run(ctx, job.ids(), args).await
		}
		Commands::Reset { job } => report(ResultBuilder::new(name), lifecycle::reset(ctx, job.ids()).await),
		Commands::Release { job } => report(ResultBuilder::new(name), lifecycle::release(ctx, job.ids()).await),
	}
}

/// Prints the failure envelope for `command`.
pub fn print_failure(command: &str, err: &CliError) {
	print_result(&failure(ResultBuilder::<()>::new(command), err));
}

fn report<T: Serialize>(builder: ResultBuilder<T>, outcome: Result<T>) -> Result<()> {
	match outcome {
		Ok(data) => {
			print_result(&builder.data(data).build());
			Ok(())
		}
		Err(err) => {
			print_result(&failure(builder, &err));
			Err(err)
		}
	}
}

fn failure<T: Serialize>(builder: ResultBuilder<T>, err: &CliError) -> CommandResult<T> {
	let builder = builder.error(err.code(), err.to_string());
	match err.phase() {
		Some(phase) => builder.phase(phase).build(),
		None => builder.build(),
	}
}
