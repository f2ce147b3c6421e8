use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use geom::{Duration, Time};

use track::{Track, TrackError, TrackPoint};

/// How often the timer fires while the clock is running.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Each slower/quicker step divides or multiplies the multiplier by this.
const SPEED_STEP: f64 = 2.0;
const DEFAULT_SPEED: f64 = 1.0;
const MIN_SPEED: f64 = 0.0625;
const MAX_SPEED: f64 = 64.0;

/// A notification that the clock's cursor moved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub time: Time,
}

/// Identifies one tick subscriber, for unsubscribing later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriberID(usize);

/// Replays one track's timeline against the wall clock.
///
/// While running, a timer thread advances the cursor by elapsed real time times the speed
/// multiplier and broadcasts a tick per wake. Seeks and speed changes are synchronous and take
/// effect on the next wake. When the cursor reaches the end of the track, the clock stops itself
/// and broadcasts the final tick exactly once.
pub struct PlaybackClock {
    track: Arc<RwLock<Track>>,
    state: Arc<Mutex<ClockState>>,
    timer: Option<Timer>,
}

struct Timer {
    shutdown: Sender<()>,
    handle: thread::JoinHandle<()>,
}

struct ClockState {
    cursor: Time,
    start_time: Time,
    end_time: Time,
    speed_multiplier: f64,
    running: bool,
    subscribers: BTreeMap<SubscriberID, Sender<Tick>>,
    next_subscriber: usize,
}

impl ClockState {
    fn broadcast(&mut self) {
        let tick = Tick { time: self.cursor };
        // A subscriber that hasn't drained its last tick just misses this one; never queue a
        // backlog behind a slow consumer.
        self.subscribers.retain(|_, tx| match tx.try_send(tick) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl PlaybackClock {
    /// Binds a clock to one track. The playable window is snapshotted from the track's current
    /// first and last samples, so an empty track can't back a clock.
    pub fn new(track: Arc<RwLock<Track>>) -> Result<Self, TrackError> {
        let (start_time, end_time) = {
            let track = track.read().unwrap();
            (
                track.start_track_point()?.time,
                track.end_track_point()?.time,
            )
        };

        Ok(Self {
            track,
            state: Arc::new(Mutex::new(ClockState {
                cursor: start_time,
                start_time,
                end_time,
                speed_multiplier: DEFAULT_SPEED,
                running: false,
                subscribers: BTreeMap::new(),
                next_subscriber: 0,
            })),
            timer: None,
        })
    }

    /// Begins advancing the cursor at real-time rate times the speed multiplier. Does nothing if
    /// already running.
    pub fn start(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return;
            }
            state.running = true;
        }
        self.spawn_timer();
    }

    /// Halts advancement. No more automatic ticks until `start`.
    pub fn stop(&mut self) {
        self.state.lock().unwrap().running = false;
        self.join_timer();
    }

    /// Rewinds to the start of the track and begins running, discarding any prior progress.
    pub fn restart(&mut self) {
        self.state.lock().unwrap().running = false;
        self.join_timer();

        {
            let mut state = self.state.lock().unwrap();
            state.cursor = state.start_time;
            state.running = true;
        }
        self.spawn_timer();
    }

    pub fn slow_speed(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.speed_multiplier = clamp_speed(state.speed_multiplier / SPEED_STEP);
    }

    pub fn quick_speed(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.speed_multiplier = clamp_speed(state.speed_multiplier * SPEED_STEP);
    }

    /// Jumps straight to a particular multiplier, clamped into the operating range.
    pub fn set_speed(&mut self, multiplier: f64) {
        if !multiplier.is_finite() {
            warn!("ignoring speed multiplier {}", multiplier);
            return;
        }
        let clamped = clamp_speed(multiplier);
        if clamped != multiplier {
            warn!("clamping speed multiplier {} to {}", multiplier, clamped);
        }
        self.state.lock().unwrap().speed_multiplier = clamped;
    }

    /// Seeks to a time, clamped into the track's window, and immediately notifies subscribers,
    /// even while stopped.
    pub fn set_cursor(&mut self, time: Time) {
        let mut state = self.state.lock().unwrap();
        let clamped = time.max(state.start_time).min(state.end_time);
        if clamped != time {
            debug!("seek to {} clamped to {}", time, clamped);
        }
        state.cursor = clamped;
        state.broadcast();
    }

    pub fn cur_time(&self) -> Time {
        self.state.lock().unwrap().cursor
    }

    pub fn start_time(&self) -> Time {
        self.state.lock().unwrap().start_time
    }

    pub fn end_time(&self) -> Time {
        self.state.lock().unwrap().end_time
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.state.lock().unwrap().speed_multiplier
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// The track so far: every sample up to the cursor, ending with the interpolated current
    /// position.
    pub fn track_points(&self) -> Vec<TrackPoint> {
        let cursor = self.state.lock().unwrap().cursor;
        self.track.read().unwrap().track_points_before(cursor)
    }

    /// Registers a tick listener. Each tick carries the cursor at the moment it fired. At most
    /// one tick is buffered per subscriber; the channel closes on unsubscribe or dispose.
    pub fn subscribe(&mut self) -> (SubscriberID, Receiver<Tick>) {
        let mut state = self.state.lock().unwrap();
        let id = SubscriberID(state.next_subscriber);
        state.next_subscriber += 1;
        let (tx, rx) = bounded(1);
        state.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriberID) {
        self.state.lock().unwrap().subscribers.remove(&id);
    }

    /// Shuts down the timer and drops every subscription. Consuming the clock means this can
    /// only happen once.
    pub fn dispose(self) {
        // Drop does the work.
    }

    fn spawn_timer(&mut self) {
        // Reap a previous thread that stopped on its own
        self.join_timer();

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let state = Arc::clone(&self.state);
        let handle = thread::spawn(move || run_timer(state, shutdown_rx));
        self.timer = Some(Timer {
            shutdown: shutdown_tx,
            handle,
        });
    }

    fn join_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            let _ = timer.shutdown.try_send(());
            let _ = timer.handle.join();
        }
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.subscribers.clear();
        }
        self.join_timer();
    }
}

fn run_timer(state: Arc<Mutex<ClockState>>, shutdown: Receiver<()>) {
    let mut last_wake = Instant::now();
    loop {
        match shutdown.recv_timeout(TICK_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let elapsed = Duration::seconds((now - last_wake).as_secs_f64());
        last_wake = now;

        let mut state = state.lock().unwrap();
        if !state.running {
            return;
        }
        let next = state.cursor + state.speed_multiplier * elapsed;
        state.cursor = next.min(state.end_time);
        let done = state.cursor == state.end_time;
        if done {
            // The clock owns stopping at the end; subscribers see one final tick exactly at the
            // end time and never have to race each other over who stops playback.
            state.running = false;
            info!("playback finished at {}", state.cursor);
        }
        state.broadcast();
        if done {
            return;
        }
    }
}

fn clamp_speed(multiplier: f64) -> f64 {
    multiplier.clamp(MIN_SPEED, MAX_SPEED)
}
