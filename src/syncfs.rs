//! The sync engine for one (project, compute server) pairing
//!
//! `SyncFs` ties the pieces together: it mounts the overlay, runs sync cycles
//! on an adaptive timer, answers control messages and tears everything down
//! on close. Lifecycle: `init -> ready <-> sync -> closed`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::ProjectApi;
use crate::config::{ExcludeSet, Options};
use crate::control::{ControlAck, ControlChannel, ControlMessage};
use crate::error::SyncFsError;
use crate::logging::*;
use crate::mount::{CommandRunner, MountManager};
use crate::reconcile::Reconciler;
use crate::reporter::StateReporter;
use crate::scheduler::{AdaptiveInterval, MAX_FAILURES_IN_A_ROW};
use crate::transfer::{TarStream, TransferEngine};
use crate::types::{CycleSummary, DetailedState, SyncPhase, SyncState};
use crate::utils::truncate;

/// How often registration with the project is repeated
pub const REREGISTER_INTERVAL: Duration = Duration::from_secs(30);

/// Wake-up period of the loop when the exclude list disables sync
pub const DISABLED_SLEEP: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest error text put into a status record
pub const STATUS_MESSAGE_LIMIT: usize = 250;

const ERROR_STATUS_TIMEOUT: u64 = 60;
const READY_STATUS_SLACK: f64 = 3.0;

const NOT_CONNECTED_HINT: &str =
	"the overlay mount is disconnected; restart the compute server to recover: ";

/// External systems the engine talks to
pub struct Collaborators {
	pub api: Arc<dyn ProjectApi>,
	pub tar: Arc<dyn TarStream>,
	pub channel: Arc<dyn ControlChannel>,
	pub runner: Box<dyn CommandRunner>,
}

struct Inner {
	options: Options,
	exclude: ExcludeSet,
	api: Arc<dyn ProjectApi>,
	channel: Arc<dyn ControlChannel>,
	mounts: MountManager,
	reconciler: Reconciler,
	transfer: TransferEngine,
	reporter: StateReporter,
	state: Mutex<SyncState>,
	fail_count: AtomicU32,
	interval: Mutex<AdaptiveInterval>,
	shutdown: watch::Sender<bool>,
	loop_task: Mutex<Option<JoinHandle<()>>>,
	aux_tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a sync engine; clones share the same instance
#[derive(Clone)]
pub struct SyncFs {
	inner: Arc<Inner>,
}

impl SyncFs {
	pub fn new(options: Options, collaborators: Collaborators) -> Result<Self, SyncFsError> {
		options.validate()?;
		let Collaborators { api, tar, channel, runner } = collaborators;
		let (shutdown, _) = watch::channel(false);
		let inner = Inner {
			exclude: options.exclude_set(),
			mounts: MountManager::new(&options, runner),
			reconciler: Reconciler::new(&options, Arc::clone(&api))?,
			transfer: TransferEngine::new(&options, tar)?,
			reporter: StateReporter::new(Arc::clone(&api), options.compute_server_id),
			interval: Mutex::new(AdaptiveInterval::new(
				options.sync_interval_min,
				options.sync_interval_max,
			)),
			state: Mutex::new(SyncState::Init),
			fail_count: AtomicU32::new(0),
			shutdown,
			loop_task: Mutex::new(None),
			aux_tasks: Mutex::new(Vec::new()),
			options,
			api,
			channel,
		};
		Ok(SyncFs { inner: Arc::new(inner) })
	}

	pub fn state(&self) -> SyncState {
		*lock(&self.inner.state)
	}

	/// Consecutive failed cycles
	pub fn fail_count(&self) -> u32 {
		self.inner.fail_count.load(Ordering::SeqCst)
	}

	/// Current adaptive interval in seconds
	pub fn interval_seconds(&self) -> f64 {
		lock(&self.inner.interval).seconds()
	}

	pub fn options(&self) -> &Options {
		&self.inner.options
	}

	/// Set up mounts and start the background tasks.
	///
	/// Mount failures are returned and leave the instance unusable.
	pub async fn init(&self) -> Result<(), SyncFsError> {
		self.setup().await?;
		self.start();
		Ok(())
	}

	/// One-time setup without starting any background task
	pub async fn setup(&self) -> Result<(), SyncFsError> {
		let state = self.state();
		if state != SyncState::Init {
			return Err(SyncFsError::NotReady { state });
		}
		let inner = &self.inner;
		inner.mounts.mount().await?;
		inner.mounts.bind_excludes().await?;

		tokio::fs::create_dir_all(inner.options.scratch_dir()).await?;
		let error_file = inner.options.error_file();
		match tokio::fs::remove_file(&error_file).await {
			Ok(()) => debug!("Removed stale {}", error_file.display()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => warn!("Could not remove {}: {}", error_file.display(), e),
		}

		self.register().await;

		let mut state = lock(&inner.state);
		if *state == SyncState::Init {
			*state = SyncState::Ready;
		}
		Ok(())
	}

	fn start(&self) {
		let rx = self.inner.shutdown.subscribe();

		let inbound = self.inner.channel.subscribe();
		let listener = tokio::spawn(self.clone().listen(inbound));
		let reregister = tokio::spawn(self.clone().reregister_loop(rx.clone()));
		lock(&self.inner.aux_tasks).extend([listener, reregister]);

		let main = tokio::spawn(self.clone().run_loop(rx));
		*lock(&self.inner.loop_task) = Some(main);
	}

	async fn register(&self) {
		let id = self.inner.options.compute_server_id;
		match self.inner.api.compute_server_sync_register(id).await {
			Ok(()) => debug!("Registered compute server {} for sync requests", id),
			Err(e) => warn!("Failed to register compute server {} for sync: {}", id, e),
		}
	}

	// ========================================================================
	// CYCLE
	// ========================================================================

	/// Run one full sync cycle.
	///
	/// Rejected (without side effects) unless the instance is ready and the
	/// exclude list leaves syncing on. A failing cycle is reported and
	/// recorded before the error is returned.
	pub async fn sync(&self) -> Result<CycleSummary, SyncFsError> {
		if self.inner.exclude.disables_sync() {
			return Err(SyncFsError::SyncDisabled);
		}
		{
			let mut state = lock(&self.inner.state);
			match *state {
				SyncState::Ready => *state = SyncState::Sync,
				SyncState::Sync => return Err(SyncFsError::AlreadySyncing),
				other => return Err(SyncFsError::NotReady { state: other }),
			}
		}

		let result = self.run_cycle().await;

		{
			let mut state = lock(&self.inner.state);
			if *state != SyncState::Closed {
				*state = SyncState::Ready;
			}
		}

		match result {
			Ok(summary) => {
				self.inner.fail_count.store(0, Ordering::SeqCst);
				let seconds = {
					let mut interval = lock(&self.inner.interval);
					if summary.did_work() {
						interval.on_work();
					} else {
						interval.on_idle();
					}
					interval.seconds()
				};
				self.inner.reporter.report(
					DetailedState::new("ready")
						.with_progress(100)
						.with_timeout((READY_STATUS_SLACK + seconds).round() as u64),
				);
				debug!("Sync cycle done: {:?}, next interval {:.1}s", summary, seconds);
				Ok(summary)
			}
			Err(e) => Err(self.record_failure(e).await),
		}
	}

	async fn run_cycle(&self) -> Result<CycleSummary, SyncFsError> {
		let inner = &self.inner;
		let mut summary = CycleSummary::default();

		self.phase(SyncPhase::Scanning);
		let state = inner.reconciler.scan().await?;

		self.phase(SyncPhase::Exchanging);
		let manifest = inner.reconciler.exchange(&state).await?;

		let stale = inner.reconciler.stale_upper_copies(&state);
		if !stale.is_empty() || !manifest.remove_from_compute.is_empty() {
			self.phase(SyncPhase::Removing);
			summary.whiteouts_applied = inner.transfer.remove_local(&stale).await?;
			let existing = inner.transfer.remove_local(&manifest.remove_from_compute).await?;
			if existing < manifest.remove_from_compute.len() {
				debug!(
					"{} of {} requested removals were already gone",
					manifest.remove_from_compute.len() - existing,
					manifest.remove_from_compute.len()
				);
			}
			summary.removed = manifest.remove_from_compute.len();
		}

		if let Some(list) = &manifest.copy_from_project_tar {
			self.phase(SyncPhase::Pulling);
			inner.transfer.pull(list).await?;
			summary.pulled = true;
		}

		if !manifest.copy_from_compute.is_empty() {
			let files = manifest.copy_from_compute.len();
			self.phase(SyncPhase::Pushing { files });
			inner.transfer.push(&manifest.copy_from_compute).await?;
			summary.pushed = files;
		}

		if inner.options.read_tracking_file.is_some() {
			self.phase(SyncPhase::ReadTracking);
			inner.transfer.update_read_tracking().await;
		}

		Ok(summary)
	}

	fn phase(&self, phase: SyncPhase) {
		self.inner.reporter.report(phase.status());
	}

	async fn record_failure(&self, err: SyncFsError) -> SyncFsError {
		let failures = self.inner.fail_count.fetch_add(1, Ordering::SeqCst) + 1;
		let full = describe_failure(&err);
		error!("Sync cycle failed ({} in a row): {}", failures, full);

		let message = truncate(&full, STATUS_MESSAGE_LIMIT);
		self.inner.reporter.report(
			DetailedState::new("error")
				.with_extra(message.clone())
				.with_progress(0)
				.with_timeout(ERROR_STATUS_TIMEOUT),
		);

		let error_file = self.inner.options.error_file();
		if let Err(e) = tokio::fs::write(&error_file, format!("{}\n", full)).await {
			warn!("Could not write {}: {}", error_file.display(), e);
		}
		SyncFsError::CycleFailed { message }
	}

	// ========================================================================
	// LOOP
	// ========================================================================

	/// One scheduled tick; returns how long to wait before the next one
	pub async fn tick(&self) -> Duration {
		let started = Instant::now();

		if self.fail_count() >= MAX_FAILURES_IN_A_ROW {
			match self.inner.reporter.get().await {
				Some(status) if status.extra.is_none() => {
					info!("Error status cleared; resuming sync");
					self.inner.fail_count.store(0, Ordering::SeqCst);
				}
				_ => {
					warn!(
						"Sync paused after {} failures in a row; clear the error status to resume",
						self.fail_count()
					);
					return lock(&self.inner.interval).next_wait(started.elapsed());
				}
			}
		}

		match self.sync().await {
			Ok(_) => {}
			Err(SyncFsError::AlreadySyncing) => debug!("Tick skipped: sync in progress"),
			Err(e @ (SyncFsError::NotReady { .. } | SyncFsError::SyncDisabled)) => {
				debug!("Tick skipped: {}", e)
			}
			Err(_) => lock(&self.inner.interval).on_error(),
		}
		lock(&self.inner.interval).next_wait(started.elapsed())
	}

	async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
		if self.inner.exclude.disables_sync() {
			info!("Exclude list disables sync; sleeping");
			loop {
				tokio::select! {
					_ = tokio::time::sleep(DISABLED_SLEEP) => {}
					_ = shutdown.changed() => return,
				}
			}
		}

		loop {
			if self.state() == SyncState::Closed {
				return;
			}
			let wait = self.tick().await;
			if self.state() == SyncState::Closed {
				return;
			}
			tokio::select! {
				_ = tokio::time::sleep(wait) => {}
				_ = shutdown.changed() => return,
			}
		}
	}

	async fn reregister_loop(self, mut shutdown: watch::Receiver<bool>) {
		loop {
			tokio::select! {
				_ = tokio::time::sleep(REREGISTER_INTERVAL) => self.register().await,
				_ = shutdown.changed() => return,
			}
		}
	}

	// ========================================================================
	// CONTROL MESSAGES
	// ========================================================================

	async fn listen(self, mut inbound: mpsc::UnboundedReceiver<String>) {
		while let Some(raw) = inbound.recv().await {
			match ControlMessage::parse(&raw) {
				Ok(Some(message)) => self.handle_control(message),
				Ok(None) => {}
				Err(e) => warn!("Ignoring malformed control message: {}", e),
			}
		}
		debug!("Control channel closed");
	}

	/// Act on one inbound control message without blocking the listener
	pub fn handle_control(&self, message: ControlMessage) {
		match message {
			ControlMessage::ComputeServerSyncRequest => {
				if self.inner.exclude.disables_sync() {
					debug!("Ignoring sync request: sync disabled");
					return;
				}
				if self.state() != SyncState::Ready {
					debug!("Ignoring sync request in state {}", self.state());
					return;
				}
				let this = self.clone();
				tokio::spawn(async move {
					if let Err(e) = this.sync().await {
						debug!("Requested sync did not complete: {}", e);
					}
				});
			}
			ControlMessage::CopyFromProjectToComputeServer { paths, id } => {
				let this = self.clone();
				tokio::spawn(async move {
					let result = this.inner.transfer.copy_from_project(&paths).await;
					this.acknowledge(id, result.map_err(|e| e.to_string())).await;
				});
			}
			ControlMessage::CopyFromComputeServerToProject { paths, id } => {
				let this = self.clone();
				tokio::spawn(async move {
					let result = this.inner.transfer.copy_to_project(&paths).await;
					this.acknowledge(id, result.map_err(|e| e.to_string())).await;
				});
			}
		}
	}

	async fn acknowledge(&self, id: Option<String>, result: Result<(), String>) {
		let ack = match (id, result) {
			(Some(id), Ok(())) => ControlAck::Success { id },
			(Some(id), Err(error)) => ControlAck::Error { id, error },
			(None, Ok(())) => return,
			(None, Err(error)) => {
				warn!("Copy request failed: {}", error);
				return;
			}
		};
		if let Err(e) = self.inner.channel.send(ack).await {
			warn!("Failed to acknowledge copy request: {}", e);
		}
	}

	// ========================================================================
	// TEARDOWN
	// ========================================================================

	/// Stop everything and unmount. Idempotent; never fails.
	pub async fn close(&self) {
		{
			let mut state = lock(&self.inner.state);
			if *state == SyncState::Closed {
				return;
			}
			*state = SyncState::Closed;
		}
		info!("Closing sync for compute server {}", self.inner.options.compute_server_id);

		self.inner.shutdown.send_replace(true);
		for task in lock(&self.inner.aux_tasks).drain(..) {
			task.abort();
		}
		// an in-flight cycle finishes on its own and then sees the closed state
		drop(lock(&self.inner.loop_task).take());

		self.inner.mounts.unmount().await;
	}
}

/// Error text for status and error file, with a hint for dead mounts
fn describe_failure(err: &SyncFsError) -> String {
	let message = match err {
		SyncFsError::CycleFailed { message } => message.clone(),
		other => other.to_string(),
	};
	if message.contains("ENOTCONN") || message.contains("Transport endpoint is not connected") {
		format!("{}{}", NOT_CONNECTED_HINT, message)
	} else {
		message
	}
}


// vim: ts=4
