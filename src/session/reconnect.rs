//! Bounded reconnection with linear backoff.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::model::{BandwidthLimit, MediaTrack, SimulcastConfig};

/// Close reasons that mean retrying cannot help.
const AUTH_FAILURES: &[&str] = &["unauthorized", "invalid token", "expired token", "missing token"];

pub fn is_auth_failure(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    AUTH_FAILURES.iter().any(|r| reason.contains(r))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStatus {
    Initial,
    Reconnecting,
    Failed,
}

/// A local track as it was when the connection broke.
#[derive(Debug, Clone)]
pub struct SnapshotTrack {
    pub track: MediaTrack,
    pub metadata: Value,
    pub simulcast_config: SimulcastConfig,
    pub max_bandwidth: BandwidthLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// First attempt of a new reconnection.
    Started(Instant),
    Scheduled(Instant),
    AlreadyScheduled,
    LimitReached,
    Ignored,
}

#[derive(Debug)]
pub(crate) struct ReconnectManager {
    config: ReconnectConfig,
    status: ReconnectStatus,
    attempt: u32,
    deadline: Option<Instant>,
    initial_metadata: Option<Value>,
    last_metadata: Option<Value>,
    snapshot: Vec<SnapshotTrack>,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> ReconnectManager {
        ReconnectManager {
            config,
            status: ReconnectStatus::Initial,
            attempt: 0,
            deadline: None,
            initial_metadata: None,
            last_metadata: None,
            snapshot: vec![],
        }
    }

    pub fn status(&self) -> ReconnectStatus {
        self.status
    }

    pub fn is_reconnecting(&self) -> bool {
        self.status == ReconnectStatus::Reconnecting
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remember_metadata(&mut self, metadata: &Value) {
        if self.initial_metadata.is_none() {
            self.initial_metadata = Some(metadata.clone());
        }
        self.last_metadata = Some(metadata.clone());
    }

    /// Schedule the next attempt after a failure.
    ///
    /// `snapshot` is only called when a new reconnection starts.
    pub fn trigger(&mut self, now: Instant, snapshot: impl FnOnce() -> Vec<SnapshotTrack>) -> Trigger {
        if self.deadline.is_some() {
            return Trigger::AlreadyScheduled;
        }

        if self.attempt >= self.config.max_attempts {
            if self.status == ReconnectStatus::Reconnecting {
                warn!("Giving up after {} reconnection attempts", self.attempt);
                self.status = ReconnectStatus::Failed;
                return Trigger::LimitReached;
            }
            return Trigger::Ignored;
        }

        let started = self.status != ReconnectStatus::Reconnecting;
        if started {
            self.status = ReconnectStatus::Reconnecting;
            self.snapshot = snapshot();
        }

        let delay = self.config.initial_delay + self.config.delay * self.attempt;
        let deadline = now + delay;
        self.deadline = Some(deadline);
        self.attempt += 1;
        info!("Reconnection attempt {} in {:?}", self.attempt, delay);

        if started {
            Trigger::Started(deadline)
        } else {
            Trigger::Scheduled(deadline)
        }
    }

    /// Returns the connect metadata once the backoff has elapsed.
    pub fn handle_timeout(&mut self, now: Instant) -> Option<Value> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                let metadata = self
                    .last_metadata
                    .clone()
                    .or_else(|| self.initial_metadata.clone())
                    .unwrap_or(Value::Null);
                Some(metadata)
            }
            _ => None,
        }
    }

    /// The server accepted us again. Yields the tracks to republish when this
    /// ends a reconnection.
    pub fn handle_connected(&mut self) -> Option<Vec<SnapshotTrack>> {
        self.attempt = 0;
        self.deadline = None;

        match self.status {
            ReconnectStatus::Reconnecting => {
                self.status = ReconnectStatus::Initial;
                let snapshot = std::mem::take(&mut self.snapshot);
                if !self.config.add_tracks_on_reconnect {
                    return Some(vec![]);
                }
                Some(snapshot.into_iter().filter(|t| !t.track.is_ended()).collect())
            }
            ReconnectStatus::Failed => {
                self.status = ReconnectStatus::Initial;
                None
            }
            ReconnectStatus::Initial => None,
        }
    }

    pub fn reset(&mut self) {
        debug!("Reconnection state reset");
        self.status = ReconnectStatus::Initial;
        self.attempt = 0;
        self.deadline = None;
        self.snapshot.clear();
    }
}
