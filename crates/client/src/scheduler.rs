//! Timers behind a seam so that coordinators can be driven by virtual time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    ClockTick,
    PollGame,
    PollInvitation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub trait Scheduler {
    fn schedule_repeating(&mut self, every: Duration, timer: Timer) -> TimerId;
    fn schedule_once(&mut self, after: Duration, timer: Timer) -> TimerId;
    /// Cancelling an unknown or already fired timer is a no-op.
    fn cancel(&mut self, id: TimerId);
}

#[derive(Debug)]
struct Pending {
    due: Duration,
    every: Option<Duration>,
    timer: Timer,
}

/// Deterministic scheduler: nothing fires until [`advance`](Self::advance).
#[derive(Debug, Default)]
pub struct VirtualScheduler {
    now: Duration,
    next_id: u64,
    pending: HashMap<TimerId, Pending>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.now
    }

    pub fn active(&self) -> usize {
        self.pending.len()
    }

    /// Move time forward and return every firing in deadline order.
    /// Repeating timers fire once per elapsed period.
    pub fn advance(&mut self, by: Duration) -> Vec<Timer> {
        let target = self.now + by;
        let mut fired = Vec::new();
        loop {
            let next = self
                .pending
                .iter()
                .filter(|(_, p)| p.due <= target)
                .min_by_key(|(id, p)| (p.due, **id))
                .map(|(id, _)| *id);
            let Some(id) = next else { break };

            let Some(p) = self.pending.get_mut(&id) else { break };
            self.now = p.due;
            fired.push(p.timer);
            let repeat = p.every;
            match repeat {
                Some(every) => p.due += every,
                None => {
                    self.pending.remove(&id);
                }
            }
        }
        self.now = target;
        fired
    }

    fn insert(&mut self, due: Duration, every: Option<Duration>, timer: Timer) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.insert(id, Pending { due, every, timer });
        id
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule_repeating(&mut self, every: Duration, timer: Timer) -> TimerId {
        let every = every.max(Duration::from_millis(1));
        self.insert(self.now + every, Some(every), timer)
    }

    fn schedule_once(&mut self, after: Duration, timer: Timer) -> TimerId {
        self.insert(self.now + after, None, timer)
    }

    fn cancel(&mut self, id: TimerId) {
        self.pending.remove(&id);
    }
}

/// Wall-clock scheduler: each timer is a spawned task that sends its
/// [`Timer`] on a channel the driver selects on.
pub struct TokioScheduler {
    fired: mpsc::UnboundedSender<Timer>,
    next_id: u64,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Timer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                fired: tx,
                next_id: 0,
                tasks: HashMap::new(),
            },
            rx,
        )
    }

    fn track(&mut self, handle: JoinHandle<()>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.tasks.retain(|_, task| !task.is_finished());
        self.tasks.insert(id, handle);
        id
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&mut self, every: Duration, timer: Timer) -> TimerId {
        let tx = self.fired.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(timer).is_err() {
                    break;
                }
            }
        });
        self.track(handle)
    }

    fn schedule_once(&mut self, after: Duration, timer: Timer) -> TimerId {
        let tx = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(timer);
        });
        self.track(handle)
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            debug!(?id, "Cancelling timer");
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_virtual_fires_in_deadline_order() {
        let mut s = VirtualScheduler::new();
        s.schedule_repeating(ms(1000), Timer::ClockTick);
        s.schedule_repeating(ms(1500), Timer::PollGame);
        s.schedule_once(ms(800), Timer::PollGame);

        let fired = s.advance(ms(3000));
        assert_eq!(
            fired,
            vec![
                Timer::PollGame,  // 800
                Timer::ClockTick, // 1000
                Timer::PollGame,  // 1500
                Timer::ClockTick, // 2000
                Timer::ClockTick, // 3000
                Timer::PollGame,  // 3000
            ]
        );
        assert_eq!(s.elapsed(), ms(3000));
        assert_eq!(s.active(), 2);
    }

    #[test]
    fn test_virtual_cancel() {
        let mut s = VirtualScheduler::new();
        let tick = s.schedule_repeating(ms(100), Timer::ClockTick);
        assert_eq!(s.advance(ms(250)).len(), 2);
        s.cancel(tick);
        assert!(s.advance(ms(1000)).is_empty());
        s.cancel(tick);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_delivers_and_cancels() {
        let (mut s, mut rx) = TokioScheduler::new();
        let id = s.schedule_repeating(ms(1000), Timer::PollGame);
        s.schedule_once(ms(500), Timer::ClockTick);

        assert_eq!(rx.recv().await, Some(Timer::ClockTick));
        assert_eq!(rx.recv().await, Some(Timer::PollGame));
        s.cancel(id);
        tokio::time::sleep(ms(5000)).await;
        assert!(rx.try_recv().is_err());
    }
}
