//! Leading + trailing throttle
//!
//! The first call in a quiet period fires immediately. Calls arriving within
//! the window after a fire are coalesced: only the most recent value is kept
//! and delivered once the window has elapsed.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Sink<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct ThrottleState<T> {
	last_fire: Option<Instant>,
	pending: Option<T>,
	timer_armed: bool,
}

/// Rate-limits an async side effect. Must be used from within a tokio runtime.
pub struct Throttle<T> {
	window: Duration,
	sink: Sink<T>,
	state: Arc<Mutex<ThrottleState<T>>>,
}

impl<T: Send + 'static> Throttle<T> {
	pub fn new<F, Fut>(window: Duration, f: F) -> Self
	where
		F: Fn(T) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let sink: Sink<T> = Arc::new(move |value| f(value).boxed());
		Throttle {
			window,
			sink,
			state: Arc::new(Mutex::new(ThrottleState {
				last_fire: None,
				pending: None,
				timer_armed: false,
			})),
		}
	}

	pub fn call(&self, value: T) {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

		let quiet = state.last_fire.map_or(true, |t| now.duration_since(t) >= self.window);
		if quiet && !state.timer_armed {
			state.last_fire = Some(now);
			drop(state);
			tokio::spawn((self.sink)(value));
			return;
		}

		state.pending = Some(value);
		if state.timer_armed {
			return;
		}
		state.timer_armed = true;
		let due = state.last_fire.map_or(now, |t| t + self.window);
		drop(state);

		let shared = Arc::clone(&self.state);
		let sink = Arc::clone(&self.sink);
		tokio::spawn(async move {
			tokio::time::sleep_until(due).await;
			let value = {
				let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
				state.timer_armed = false;
				state.last_fire = Some(Instant::now());
				state.pending.take()
			};
			if let Some(value) = value {
				sink(value).await;
			}
		});
	}
}


// vim: ts=4
