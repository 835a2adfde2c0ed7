use std::time::Duration;

use sbx::{SessionHandle, SessionIds};
use tracing::{info, warn};

use crate::context::CommandContext;
use crate::error::Result;
use crate::output::{ResultBuilder, TunnelData, print_result};

pub(super) struct TunnelArgs {
	pub dest_port: u16,
	pub local_port: Option<u16>,
	pub timeout: Duration,
	pub release: bool,
}

/// Holds a tunnel open until Ctrl-C. Prints one envelope once listening,
/// or a failure envelope if the tunnel never comes up.
pub(super) async fn run(ctx: &CommandContext, ids: SessionIds, args: TunnelArgs) -> Result<()> {
	let builder = ResultBuilder::new("tunnel");
	let mut session = ctx.session(ids);

	let opened = open(ctx, &mut session, &args).await;
	match opened {
		Ok(data) => {
			print_result(&builder.data(data).build());
			if let Err(err) = tokio::signal::ctrl_c().await {
				warn!(target = "sbx.cli", error = %err, "failed to wait for Ctrl-C; shutting down");
			}
			info!(target = "sbx.cli", job_id = %session.ids().job_id, "shutting down tunnel");
			finish(&mut session, args.release).await;
			Ok(())
		}
		Err(err) => {
			print_result(&super::failure(builder, &err));
			finish(&mut session, args.release).await;
			Err(err)
		}
	}
}

async fn open(ctx: &CommandContext, session: &mut SessionHandle, args: &TunnelArgs) -> Result<TunnelData> {
	session.wait_for_ready(Some(args.timeout)).await?;
	let local_port = session.start_db_tunnel(args.dest_port, args.local_port).await?;

	Ok(TunnelData {
		job_id: session.ids().job_id.clone(),
		local_port,
		dest_port: args.dest_port,
		proxy: ctx.config.proxy_address()?.to_string(),
	})
}

async fn finish(session: &mut SessionHandle, release: bool) {
	if release {
		session.close().await;
	} else {
		session.detach().await;
	}
}
