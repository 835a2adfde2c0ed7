use clap::{Args, Parser, Subcommand};
use sbx::SessionIds;

#[derive(Parser, Debug)]
#[command(name = "sbx")]
#[command(about = "Remote sandbox sessions: readiness, keepalive and database tunnels")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Deployment base URL (defaults to $SBX_BASE_URL, then http://localhost:8000)
	#[arg(long, global = true, value_name = "URL")]
	pub base_url: Option<String>,

	/// Bearer token for the status API (defaults to $SBX_API_KEY)
	#[arg(long, global = true, value_name = "KEY")]
	pub api_key: Option<String>,

	/// Connect to the tunnel proxy without TLS
	#[arg(long, global = true)]
	pub no_proxy_tls: bool,

	#[command(subcommand)]
	pub command: Commands,
}

/// Identifies the session a command acts on.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
	/// Job id of the session
	pub job: String,

	/// Run-session id from a previous reset
	#[arg(long, value_name = "ID")]
	pub run_session: Option<String>,
}

impl JobArgs {
	pub fn ids(&self) -> SessionIds {
		let ids = SessionIds::new(self.job.clone());
		match &self.run_session {
			Some(run_session) => ids.with_run_session(run_session.clone()),
			None => ids,
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Show job status and worker health once
	Status {
		#[command(flatten)]
		job: JobArgs,
	},

	/// Block until the job is running and its worker is healthy
	Wait {
		#[command(flatten)]
		job: JobArgs,
		/// Give up after this many seconds
		#[arg(long, default_value = "300")]
		timeout: u64,
	},

	/// Wait for readiness, then tunnel a sandbox port to localhost until Ctrl-C
	Tunnel {
		#[command(flatten)]
		job: JobArgs,
		/// Port inside the sandbox
		#[arg(long)]
		dest_port: u16,
		/// Local port to listen on (OS-assigned when omitted)
		#[arg(long)]
		local_port: Option<u16>,
		/// Readiness timeout in seconds
		#[arg(long, default_value = "300")]
		timeout: u64,
		/// Release the session on exit instead of leaving it running
		#[arg(long)]
		release: bool,
	},

	/// Start a fresh run inside the job and print its run-session id
	Reset {
		#[command(flatten)]
		job: JobArgs,
	},

	/// Release the session
	Release {
		#[command(flatten)]
		job: JobArgs,
	},
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Status { .. } => "status",
			Commands::Wait { .. } => "wait",
			Commands::Tunnel { .. } => "tunnel",
			Commands::Reset { .. } => "reset",
			Commands::Release { .. } => "release",
		}
	}
}
