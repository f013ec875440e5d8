/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A repeating timer with a jitterable interval, backed by a named thread and a control channel.
//!
//! The [Master](crate::paxos::master::Master) owns two of these: the election timer and the
//! heartbeat timer, of which at most one is running at any moment. Commands sent through the
//! control channel take effect between trigger executions; the trigger itself runs on the timer's
//! thread, so a long-running trigger (an election round, say) naturally suppresses further fires
//! until it returns.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum TimerCmd {
    /// Pause: no triggers until `Restart` or `Reset`.
    Stop,
    /// Resume, with the next delay drawn from the interval closure.
    Restart,
    /// Resume, with an explicit next delay; later delays come from the interval closure again.
    Reset(Duration),
    /// Tear the timer thread down.
    Destroy,
}

pub(crate) struct RepeatedTimer {
    name: &'static str,
    control: Sender<TimerCmd>,
    handle: Option<JoinHandle<()>>,
}

impl RepeatedTimer {
    /// Spawn the timer thread. The first trigger fires `first_delay` after creation; every
    /// subsequent delay is drawn from `interval`, which may jitter.
    pub(crate) fn new(
        name: &'static str,
        first_delay: Duration,
        mut interval: Box<dyn FnMut() -> Duration + Send>,
        mut on_trigger: Box<dyn FnMut() + Send>,
        start_running: bool,
    ) -> RepeatedTimer {
        let (control, commands) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut running = start_running;
                let mut next_delay = first_delay;
                loop {
                    let cmd = if running {
                        match commands.recv_timeout(next_delay) {
                            Ok(cmd) => cmd,
                            Err(RecvTimeoutError::Timeout) => {
                                on_trigger();
                                next_delay = interval();
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    } else {
                        match commands.recv() {
                            Ok(cmd) => cmd,
                            Err(_) => return,
                        }
                    };

                    match cmd {
                        TimerCmd::Stop => running = false,
                        TimerCmd::Restart => {
                            running = true;
                            next_delay = interval();
                        }
                        TimerCmd::Reset(delay) => {
                            running = true;
                            next_delay = delay;
                        }
                        TimerCmd::Destroy => return,
                    }
                }
            })
            .expect("could not spawn timer thread");

        RepeatedTimer {
            name,
            control,
            handle: Some(handle),
        }
    }

    pub(crate) fn stop(&self) {
        let _ = self.control.send(TimerCmd::Stop);
    }

    pub(crate) fn restart(&self) {
        let _ = self.control.send(TimerCmd::Restart);
    }

    pub(crate) fn reset(&self, delay: Duration) {
        let _ = self.control.send(TimerCmd::Reset(delay));
    }
}

impl Drop for RepeatedTimer {
    fn drop(&mut self) {
        let _ = self.control.send(TimerCmd::Destroy);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("timer {} panicked before shutdown", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn triggers_repeat_until_stopped() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = fires.clone();
        let timer = RepeatedTimer::new(
            "test-timer",
            Duration::from_millis(5),
            Box::new(|| Duration::from_millis(5)),
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            true,
        );

        thread::sleep(Duration::from_millis(60));
        timer.stop();
        thread::sleep(Duration::from_millis(20));
        let fired = fires.load(Ordering::SeqCst);
        assert!(fired >= 2);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(fires.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn reset_postpones_the_next_trigger() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = fires.clone();
        let timer = RepeatedTimer::new(
            "test-timer",
            Duration::from_millis(10),
            Box::new(|| Duration::from_millis(10)),
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            true,
        );

        for _ in 0..10 {
            timer.reset(Duration::from_millis(10));
            thread::sleep(Duration::from_millis(3));
        }
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stopped_timer_does_not_fire_until_restarted() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = fires.clone();
        let timer = RepeatedTimer::new(
            "test-timer",
            Duration::from_millis(5),
            Box::new(|| Duration::from_millis(5)),
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        );

        thread::sleep(Duration::from_millis(25));
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        timer.restart();
        thread::sleep(Duration::from_millis(25));
        assert!(fires.load(Ordering::SeqCst) >= 1);
    }
}
