//! Settling deferred notifications.
//!
//! After every event the kernel drains the replication's pending flags until
//! none is left, all at the same simulated instant:
//!
//! 1. continuous values are recomputed (finished flows leave, the next
//!    crossing is scheduled),
//! 2. fired signals are delivered to signal listeners and running flows,
//! 3. released resources are offered to waiting stations in priority order,
//! 4. the state-change cascade re-checks every interested gated station
//!    until nothing changes or the re-check budget is spent.
//!
//! Once settled, the termination condition is evaluated and the periodic
//! timed check is (re)armed if some station still needs it.

use std::collections::BTreeSet;

use crate::event::EventKind;
use crate::id::StationId;
use crate::journal::SimEvent;
use crate::replication::Replication;
use crate::sim::SimTime;
use crate::station::dispatch;

impl Replication<'_> {
    pub(crate) fn settle(&mut self) {
        while !self.stopped {
            if std::mem::take(&mut self.pending.continuous) {
                self.update_continuous();
            } else if !self.pending.signals.is_empty() {
                self.deliver_signals();
            } else if std::mem::take(&mut self.pending.free_resources) {
                self.notify_free_resources();
            } else if std::mem::take(&mut self.pending.change) {
                self.run_cascade();
            } else {
                break;
            }
        }
        debug_assert!(self.stopped || self.pending.is_clear());
        if self.stopped {
            return;
        }
        self.check_termination_condition();
        self.refresh_timed_checks();
    }

    fn update_continuous(&mut self) {
        let now = self.now();
        let recompute = self.continuous.recompute(now);
        for (station, client) in recompute.finished {
            if self.clients.contains(client) {
                self.schedule_leave(station, client, 0);
            }
        }
        if let Some(time) = recompute.next_event {
            let generation = self.continuous.generation();
            self.queue.schedule(time.max(now), EventKind::ContinuousUpdate { generation });
        }
        self.pending.change = true;
    }

    fn deliver_signals(&mut self) {
        let net = self.net;
        let signals = std::mem::take(&mut self.pending.signals);
        for signal in signals {
            let now = self.now();
            self.journal.record(SimEvent::SignalFired { signal, time: now });
            if let Some(count) = self.signals_fired.get_mut(signal.0 as usize) {
                *count += 1;
            }
            if self.continuous.stop_signal(signal) {
                self.pending.continuous = true;
            }
            for &listener in &net.signal_listeners {
                if let Err(e) = dispatch::signal(self, listener, signal) {
                    self.emergency_shutdown(e.to_string());
                    return;
                }
            }
        }
        self.pending.change = true;
    }

    /// Offer released units to waiting stations: highest priority first,
    /// then the longest-waiting client, then the lowest station id. After
    /// every successful start the order is rebuilt.
    fn notify_free_resources(&mut self) {
        let net = self.net;
        loop {
            let mut waiting: Vec<(f64, SimTime, StationId)> = Vec::new();
            for &station in &net.free_listeners {
                match dispatch::waiting_priority(self, station) {
                    Ok(Some((priority, since))) => waiting.push((priority, since, station)),
                    Ok(None) => {}
                    Err(e) => {
                        self.emergency_shutdown(e.to_string());
                        return;
                    }
                }
            }
            waiting.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

            let mut progressed = false;
            for (_, _, station) in waiting {
                match dispatch::resources_released(self, station) {
                    Ok(true) => {
                        progressed = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.emergency_shutdown(e.to_string());
                        return;
                    }
                }
            }
            if !progressed || self.stopped {
                break;
            }
        }
        self.pending.change = true;
    }

    /// Re-check interested state listeners in id order until a fixed point.
    /// Any change marks every listener dirty again.
    fn run_cascade(&mut self) {
        let net = self.net;
        let listeners = &net.state_listeners;
        if listeners.is_empty() {
            return;
        }
        let budget = (self.config.max_cascade_rounds.max(1) as usize).saturating_mul(listeners.len());
        let mut dirty: BTreeSet<StationId> = listeners.iter().copied().collect();
        let mut rechecks = 0usize;

        while let Some(station) = dirty.pop_first() {
            if self.stopped {
                return;
            }
            match dispatch::interested(self, station) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    self.emergency_shutdown(e.to_string());
                    return;
                }
            }
            if rechecks >= budget {
                self.warn(format!(
                    "state changes did not settle after {rechecks} re-checks at time {}; retrying in 1 ms",
                    self.now()
                ));
                self.queue.schedule_in(1, EventKind::SystemChange);
                return;
            }
            rechecks += 1;
            match dispatch::recheck(self, station) {
                Ok(true) => dirty.extend(listeners.iter().copied()),
                Ok(false) => {}
                Err(e) => {
                    self.emergency_shutdown(e.to_string());
                    return;
                }
            }
        }
    }

    fn check_termination_condition(&mut self) {
        let net = self.net;
        let Some(condition) = &net.termination else {
            return;
        };
        if self.calc_global(condition) != 0.0 && !self.stopped {
            self.terminated_by_condition = true;
            self.terminate("termination condition met");
        }
    }

    /// Arm the periodic re-check if a waiting station wants one. Never arms
    /// on an otherwise empty event queue, so a replication with nothing else
    /// to do still ends.
    fn refresh_timed_checks(&mut self) {
        let Some(interval) = self.config.timed_check_interval else {
            return;
        };
        if self.stopped || self.timed_check_scheduled || self.queue.is_empty() {
            return;
        }
        let net = self.net;
        for &station in &net.state_listeners {
            match dispatch::wants_timed_checks(self, station) {
                Ok(true) => {
                    self.timed_check_scheduled = true;
                    self.queue.schedule_in(interval.max(1), EventKind::TimedCheck);
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    self.emergency_shutdown(e.to_string());
                    return;
                }
            }
        }
    }
}
