use sbx::{SessionApi, SessionIds};

use crate::context::CommandContext;
use crate::error::Result;
use crate::output::StatusData;

/// One-shot query of both readiness signals.
pub(super) async fn run(ctx: &CommandContext, ids: SessionIds) -> Result<StatusData> {
	let (job, worker) = tokio::join!(ctx.api.job_status(&ids), ctx.api.worker_ready(&ids));
	let (job, worker) = (job?, worker?);

	Ok(StatusData {
		job_id: ids.job_id,
		run_session_id: ids.run_session_id,
		job_status: job.status,
		worker_ready: worker.ready,
		worker_detail: worker.error,
	})
}
