use std::time::Duration;

use sbx::SessionIds;

use crate::context::CommandContext;
use crate::error::Result;
use crate::output::SessionData;

/// Waits for readiness, then detaches so the session outlives the command.
pub(super) async fn run(ctx: &CommandContext, ids: SessionIds, timeout: Duration) -> Result<SessionData> {
	let mut session = ctx.session(ids);
	let waited = session.wait_for_ready(Some(timeout)).await;
	let state = session.state().as_str().to_string();
	session.detach().await;
	waited?;

	let ids = session.ids();
	Ok(SessionData {
		job_id: ids.job_id.clone(),
		run_session_id: ids.run_session_id.clone(),
		state,
	})
}
