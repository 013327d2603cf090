//! Scaled virtual time driver for Embassy.
//!
//! Implements a global `embassy_time_driver::Driver` that maps real (host)
//! time to a virtual simulation clock whose speed is set per run. The
//! simulation is virtually paced, not wall-clock paced: at 10000% a 120 s
//! scenario sleeps ~1.2 s of host time between ticks in total. The mapping
//! preserves virtual-time continuity when the scale changes by rebasing
//! only the real origin, so scheduled deadlines never wrap into the past.
//!
//! Lock ordering: CLOCK before SCHED, never the reverse, and never both
//! across a scheduler wait. `map_real_to_virtual`/`map_virtual_to_real`
//! acquire CLOCK internally and must be called with SCHED released.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant as StdInstant};

// Fixed-point Q32.32 for speed scaling. 1.0 == 1<<32
const ONE_Q32: u64 = 1u64 << 32;

/// Scale bounds in percent: 1% (debugging) to 100000% (batch runs).
const MIN_SCALE_PERCENT: u32 = 1;
const MAX_SCALE_PERCENT: u32 = 100_000;

#[derive(Debug)]
struct SimClock {
    /// Host reference time corresponding to `origin_virtual_ticks`.
    origin_real: StdInstant,
    /// Virtual time origin in Embassy ticks.
    origin_virtual_ticks: u64,
    /// Q32.32 scale: virtual_dt = real_dt * scale_q32.
    scale_q32: u64,
    /// Last exact percent set; returned verbatim to avoid FP roundoff.
    last_set_percent: u32,
}

#[derive(Default)]
struct SchedulerState {
    /// Virtual-timestamp -> wakers due at that time.
    queue: BTreeMap<u64, Vec<Waker>>,
}

static CLOCK: OnceLock<Mutex<SimClock>> = OnceLock::new();
static SCHED: OnceLock<Mutex<SchedulerState>> = OnceLock::new();
static CV: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER_STARTED: OnceLock<()> = OnceLock::new();

fn clock() -> &'static Mutex<SimClock> {
    CLOCK.get_or_init(|| {
        Mutex::new(SimClock {
            origin_real: StdInstant::now(),
            origin_virtual_ticks: 0,
            scale_q32: ONE_Q32,
            last_set_percent: 100,
        })
    })
}

fn sched() -> &'static Mutex<SchedulerState> {
    SCHED.get_or_init(|| Mutex::new(SchedulerState::default()))
}

fn cv() -> &'static Condvar {
    CV.get_or_init(Condvar::new)
}

fn tick_hz() -> u64 {
    TICK_HZ as u64
}

fn real_now() -> StdInstant {
    StdInstant::now()
}

/// Map a real timestamp to virtual Embassy ticks with the current scale:
/// `virtual = origin_virtual + real_elapsed * scale`. Acquires CLOCK only.
fn map_real_to_virtual(r: StdInstant) -> u64 {
    let clock_lock = clock().lock().unwrap();
    let real_dt = r.saturating_duration_since(clock_lock.origin_real);
    let real_ticks = (real_dt.as_nanos() as u128 * tick_hz() as u128 / 1_000_000_000u128) as u64;
    let scaled = ((real_ticks as u128) * (clock_lock.scale_q32 as u128) / (ONE_Q32 as u128)) as u64;
    clock_lock.origin_virtual_ticks.wrapping_add(scaled)
}

/// Inverse mapping. Targets before the virtual origin (possible after a
/// rebase) are treated as due now to avoid underflow into absurd waits.
/// Acquires CLOCK only.
fn map_virtual_to_real(v_target: u64) -> StdInstant {
    let clock_lock = clock().lock().unwrap();
    let virt_dt = match v_target.checked_sub(clock_lock.origin_virtual_ticks) {
        Some(dt) => dt,
        None => return clock_lock.origin_real, // already due
    };
    let real_ticks =
        ((virt_dt as u128) * (ONE_Q32 as u128) / (clock_lock.scale_q32 as u128)) as u64;
    let real_ns = (real_ticks as u128) * 1_000_000_000u128 / (tick_hz() as u128);
    let real_ns_u64 = real_ns.min(u64::MAX as u128) as u64;
    clock_lock.origin_real + Duration::from_nanos(real_ns_u64)
}

/// Start the dedicated scheduler thread once. Safe to call repeatedly.
fn ensure_scheduler_thread() {
    SCHEDULER_STARTED.get_or_init(|| {
        std::thread::Builder::new()
            .name("sim-time-scheduler".into())
            .spawn(scheduler_thread)
            .expect("failed to start sim-time scheduler thread");
    });
}

/// Waits for the next due virtual deadline and wakes registered wakers.
///
/// Waits are sliced (<= 25 ms) so scale changes apply quickly even if a
/// notify is missed. The CLOCK-before-SCHED ordering is preserved by
/// extracting data from one lock before acquiring the other.
fn scheduler_thread() {
    const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);
    loop {
        // Extract the earliest deadline with SCHED released before any
        // CLOCK access.
        let next_at = loop {
            let guard = sched().lock().unwrap();
            if guard.queue.is_empty() {
                let guard = cv().wait(guard).unwrap();
                drop(guard);
                continue;
            }
            let (&next_at, _) = guard.queue.iter().next().unwrap();
            drop(guard);
            break next_at;
        };

        let real_target = map_virtual_to_real(next_at);
        let now_r = real_now();

        if real_target > now_r {
            let mut wait_dur = real_target - now_r;
            if wait_dur > MAX_WAIT_SLICE {
                wait_dur = MAX_WAIT_SLICE;
            }
            let guard = sched().lock().unwrap();
            let (guard, _timeout) = cv().wait_timeout(guard, wait_dur).unwrap();
            // Epoch changes and notifies both just re-enter the loop with a
            // fresh mapping.
            drop(guard);
            continue;
        }

        // Drain all due wakers. Virtual "now" is computed before taking
        // SCHED (CLOCK is acquired and released inside the mapping).
        let now_v = map_real_to_virtual(real_now());
        let mut ready: Vec<Waker> = Vec::new();
        {
            let mut guard = sched().lock().unwrap();
            let mut due = Vec::new();
            for (&ts, wakers) in guard.queue.iter() {
                if ts <= now_v {
                    ready.extend(wakers.iter().cloned());
                    due.push(ts);
                } else {
                    break;
                }
            }
            for ts in due {
                guard.queue.remove(&ts);
            }
        }

        // Wake with no locks held.
        for waker in ready {
            waker.wake();
        }
    }
}

struct SimDriver;

impl Driver for SimDriver {
    /// Current virtual time in Embassy ticks.
    fn now(&self) -> u64 {
        map_real_to_virtual(real_now())
    }

    /// Schedule a wakeup at a virtual-tick timestamp.
    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_scheduler_thread();
        let mut guard = sched().lock().unwrap();
        guard.queue.entry(at).or_default().push(waker.clone());
        drop(guard);
        cv().notify_all();
    }
}

// Register as the global time driver for embassy-time.
time_driver_impl!(static DRIVER: SimDriver = SimDriver);

/// Set the simulation time scale in percent of wall-clock speed.
/// Preserves virtual-time continuity: only the real origin is rebased, so
/// queued deadlines stay valid under the new scale.
pub fn set_time_scale_percent(percent: u32) {
    let percent = percent.clamp(MIN_SCALE_PERCENT, MAX_SCALE_PERCENT);
    if get_time_scale_percent() == percent {
        return;
    }
    let r_now = real_now();
    // Virtual 'now' under the OLD mapping, before mutation.
    let v_now_old = map_real_to_virtual(r_now);
    let new_scale_q32 = ((percent as u128) * (ONE_Q32 as u128) / 100u128) as u64;

    {
        let mut c = clock().lock().unwrap();
        let delta_v = v_now_old.saturating_sub(c.origin_virtual_ticks) as u128;
        let real_elapsed_new_ticks = if new_scale_q32 == 0 {
            0
        } else {
            delta_v * (ONE_Q32 as u128) / (new_scale_q32 as u128)
        };
        let real_elapsed_new_ns = real_elapsed_new_ticks * 1_000_000_000u128 / (tick_hz() as u128);
        let dur = Duration::from_nanos(real_elapsed_new_ns.min(u64::MAX as u128) as u64);
        c.origin_real = r_now.checked_sub(dur).unwrap_or(r_now);
        c.scale_q32 = new_scale_q32;
        c.last_set_percent = percent;
    }

    // Wake the scheduler so queued deadlines are re-evaluated under the
    // new mapping; sliced waits bound the staleness if a notify is missed.
    cv().notify_all();
    log::debug!("Simulation time scale set to {}%", percent);
}

/// Get the time scale exactly as last set (no floating-point rounding).
pub fn get_time_scale_percent() -> u32 {
    clock().lock().unwrap().last_set_percent
}
