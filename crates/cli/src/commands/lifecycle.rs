use sbx::{SessionApi, SessionIds, SessionState};
use tracing::info;

use crate::context::CommandContext;
use crate::error::Result;
use crate::output::SessionData;

pub(super) async fn reset(ctx: &CommandContext, ids: SessionIds) -> Result<SessionData> {
	let mut session = ctx.session(ids);
	let reset = session.reset().await.cloned();
	let state = session.state().as_str().to_string();
	session.detach().await;
	let ids = reset?;

	Ok(SessionData {
		job_id: ids.job_id,
		run_session_id: ids.run_session_id,
		state,
	})
}

/// Releases directly through the API so failures reach the caller.
pub(super) async fn release(ctx: &CommandContext, ids: SessionIds) -> Result<SessionData> {
	ctx.api.release_session(&ids).await?;
	info!(target = "sbx.cli", job_id = %ids.job_id, "session released");

	Ok(SessionData {
		job_id: ids.job_id,
		run_session_id: ids.run_session_id,
		state: SessionState::Closed.as_str().to_string(),
	})
}
