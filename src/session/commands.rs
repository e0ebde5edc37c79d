//! Serialized track mutations
//!
//! Adding, removing and replacing local tracks all change the engine's
//! transceiver set, so they are queued and applied one at a time. A command
//! that starts a renegotiation stays in flight until the next gated dequeue,
//! which only happens once the answer has been accepted and the engine has
//! settled.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use serde_json::Value;
use str0m::media::{Direction, MediaKind};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bandwidth::{apply_bandwidth_limitation, simulcast_encodings, EncodingParameters};
use crate::engine::{MediaEngine, TransceiverInit};
use crate::error::{CommandError, EngineError};
use crate::model::{BandwidthLimit, MediaTrack, SimulcastConfig, TrackContext, TrackId};
use crate::protocol::events::{CustomEvent, TrackIdData};
use crate::session::notification::Notification;
use crate::session::Session;

type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

impl CommandId {
    fn next() -> CommandId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        CommandId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller's side of a queued command.
///
/// Await it, or poll it without blocking through [`PendingCommand::try_result`].
#[derive(Debug)]
pub struct PendingCommand<T> {
    id: CommandId,
    rx: oneshot::Receiver<CommandResult<T>>,
}

impl<T> PendingCommand<T> {
    fn channel() -> (PendingCommand<T>, CommandId, oneshot::Sender<CommandResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let id = CommandId::next();
        (PendingCommand { id, rx }, id, tx)
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    /// The outcome, if the command has completed. Once taken, later calls
    /// report `SessionClosed`.
    pub fn try_result(&mut self) -> Option<CommandResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CommandError::SessionClosed)),
        }
    }
}

impl<T> Future for PendingCommand<T> {
    type Output = CommandResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CommandError::SessionClosed)))
    }
}

pub(crate) struct AddTrack {
    id: CommandId,
    track_id: TrackId,
    track: MediaTrack,
    metadata: Value,
    simulcast_config: SimulcastConfig,
    max_bandwidth: BandwidthLimit,
    tx: oneshot::Sender<CommandResult<TrackId>>,
}

pub(crate) enum Command {
    Add(AddTrack),
    Remove {
        id: CommandId,
        track_id: TrackId,
        tx: oneshot::Sender<CommandResult<()>>,
    },
    Replace {
        id: CommandId,
        track_id: TrackId,
        track: Option<MediaTrack>,
        metadata: Option<Value>,
        tx: oneshot::Sender<CommandResult<()>>,
    },
}

impl Command {
    fn id(&self) -> CommandId {
        match self {
            Command::Add(add) => add.id,
            Command::Remove { id, .. } | Command::Replace { id, .. } => *id,
        }
    }

    fn reject(self, error: CommandError) {
        // A dropped receiver means nobody is waiting for the outcome.
        match self {
            Command::Add(add) => {
                let _ = add.tx.send(Err(error));
            }
            Command::Remove { tx, .. } | Command::Replace { tx, .. } => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

/// The command that started the current renegotiation.
pub(crate) enum Resolver {
    Track(CommandId, oneshot::Sender<CommandResult<TrackId>>, TrackId),
    Unit(CommandId, oneshot::Sender<CommandResult<()>>),
}

impl Resolver {
    fn resolve(self) {
        match self {
            Resolver::Track(id, tx, track_id) => {
                debug!("Command {} resolved with {}", id, track_id);
                let _ = tx.send(Ok(track_id));
            }
            Resolver::Unit(id, tx) => {
                debug!("Command {} resolved", id);
                let _ = tx.send(Ok(()));
            }
        }
    }

    fn reject(self, error: CommandError) {
        match self {
            Resolver::Track(_, tx, _) => {
                let _ = tx.send(Err(error));
            }
            Resolver::Unit(_, tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct CommandQueue {
    queue: VecDeque<Command>,
    in_flight: Option<Resolver>,
}

impl CommandQueue {
    fn push(&mut self, command: Command) {
        debug!("Command {} queued ({} waiting)", command.id(), self.queue.len());
        self.queue.push_back(command);
    }

    /// Reject everything queued or in flight.
    pub(crate) fn reject_all(&mut self, error: CommandError) {
        if let Some(resolver) = self.in_flight.take() {
            resolver.reject(error.clone());
        }
        for command in self.queue.drain(..) {
            command.reject(error.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<E: MediaEngine> Session<E> {
    /// Publish a local track.
    ///
    /// The track id is issued immediately. The returned command resolves with
    /// the same id once the server has accepted the renegotiation.
    pub fn add_track(
        &mut self,
        track: MediaTrack,
        metadata: Value,
        simulcast_config: SimulcastConfig,
        max_bandwidth: BandwidthLimit,
    ) -> (TrackId, PendingCommand<TrackId>) {
        let track_id = TrackId::generate(self.registry.local_id());
        let (pending, id, tx) = PendingCommand::channel();

        self.commands.push(Command::Add(AddTrack {
            id,
            track_id: track_id.clone(),
            track,
            metadata,
            simulcast_config,
            max_bandwidth,
            tx,
        }));
        self.process_next_command();

        (track_id, pending)
    }

    pub fn remove_track(&mut self, track_id: &TrackId) -> PendingCommand<()> {
        let (pending, id, tx) = PendingCommand::channel();
        self.commands.push(Command::Remove {
            id,
            track_id: track_id.clone(),
            tx,
        });
        self.process_next_command();
        pending
    }

    /// Swap the media handle of a local track. `None` mutes the track.
    pub fn replace_track(
        &mut self,
        track_id: &TrackId,
        track: Option<MediaTrack>,
        metadata: Option<Value>,
    ) -> PendingCommand<()> {
        let (pending, id, tx) = PendingCommand::channel();
        self.commands.push(Command::Replace {
            id,
            track_id: track_id.clone(),
            track,
            metadata,
            tx,
        });
        self.process_next_command();
        pending
    }

    fn can_dequeue(&self) -> bool {
        if self.renegotiation_in_flight || self.replace_in_flight {
            return false;
        }
        self.engine.as_ref().map_or(true, |e| e.state().is_settled())
    }

    /// Apply queued commands until one starts a renegotiation or the gate
    /// closes.
    pub(crate) fn process_next_command(&mut self) {
        while self.can_dequeue() {
            if let Some(resolver) = self.commands.in_flight.take() {
                resolver.resolve();
            }

            let Some(command) = self.commands.queue.pop_front() else {
                return;
            };

            match command {
                Command::Add(add) => self.apply_add_track(add),
                Command::Remove { id, track_id, tx } => self.apply_remove_track(id, track_id, tx),
                Command::Replace {
                    track_id,
                    track,
                    metadata,
                    tx,
                    ..
                } => self.apply_replace_track(track_id, track, metadata, tx),
            }
        }
    }

    fn validate_add_track(&self, add: &AddTrack) -> Result<(), CommandError> {
        if self.registry.local_id().is_empty() {
            return Err(CommandError::NotAccepted);
        }
        if !add.simulcast_config.enabled && matches!(add.max_bandwidth, BandwidthLimit::Simulcast(_)) {
            return Err(CommandError::InvalidBandwidthLimit);
        }
        let attached = self
            .registry
            .local_track_by_handle_id(add.track.id())
            .map_or(false, |t| t.sender.is_some());
        if self.engine.is_some() && attached {
            return Err(CommandError::DuplicateTrack);
        }
        Ok(())
    }

    fn apply_add_track(&mut self, add: AddTrack) {
        if let Err(e) = self.validate_add_track(&add) {
            warn!("Rejecting track {}: {}", add.track_id, e);
            let _ = add.tx.send(Err(e));
            return;
        }

        let metadata = self.registry.parse_track_metadata(add.metadata);
        let context = TrackContext::local(
            add.track_id.clone(),
            self.registry.local_id(),
            add.track,
            metadata,
            add.simulcast_config,
            add.max_bandwidth,
        );
        self.registry.insert_local_track(context);

        if self.engine.is_some() {
            if let Err(e) = self.attach_local_track(&add.track_id) {
                warn!("Engine refused track {}: {}", add.track_id, e);
                self.registry.remove_local_track(&add.track_id);
                let _ = add.tx.send(Err(e.into()));
                return;
            }
            self.set_sendonly();
        }

        info!("Local track {} added", add.track_id);
        self.renegotiation_in_flight = true;
        self.commands.in_flight = Some(Resolver::Track(add.id, add.tx, add.track_id.clone()));
        self.send(CustomEvent::RenegotiateTracks.into());

        if let Some(context) = self.registry.local_track(&add.track_id) {
            let context = context.clone();
            self.notify(Notification::LocalTrackAdded(context));
        }
    }

    fn apply_remove_track(&mut self, id: CommandId, track_id: TrackId, tx: oneshot::Sender<CommandResult<()>>) {
        let Some(sender) = self.registry.local_track(&track_id).map(|t| t.sender) else {
            let _ = tx.send(Err(CommandError::UnknownTrack(track_id)));
            return;
        };

        if let (Some(engine), Some(sender)) = (self.engine.as_mut(), sender) {
            if let Err(e) = engine.remove_source(sender) {
                let _ = tx.send(Err(e.into()));
                return;
            }
        }

        self.registry.remove_local_track(&track_id);
        info!("Local track {} removed", track_id);

        if self.engine.is_some() {
            self.renegotiation_in_flight = true;
            self.commands.in_flight = Some(Resolver::Unit(id, tx));
            self.send(CustomEvent::RenegotiateTracks.into());
        } else {
            let _ = tx.send(Ok(()));
        }

        self.notify(Notification::LocalTrackRemoved { track_id });
    }

    fn apply_replace_track(
        &mut self,
        track_id: TrackId,
        track: Option<MediaTrack>,
        metadata: Option<Value>,
        tx: oneshot::Sender<CommandResult<()>>,
    ) {
        let Some(context) = self.registry.local_track(&track_id) else {
            let _ = tx.send(Err(CommandError::UnknownTrack(track_id)));
            return;
        };
        let had_track = context.track.is_some();
        let sender = context.sender;

        self.replace_in_flight = true;
        let result = match (self.engine.as_mut(), sender) {
            (Some(engine), Some(sender)) => engine.replace_track(sender, track.as_ref()),
            _ => Ok(()),
        };
        self.replace_in_flight = false;

        if let Err(e) = result {
            warn!("Replacing track {} failed: {}", track_id, e);
            let _ = tx.send(Err(e.into()));
            return;
        }

        if let Some(context) = self.registry.local_track_mut(&track_id) {
            if let Some(new) = &track {
                context.kind = Some(new.kind());
            }
            context.track = track.clone();
        }

        match (had_track, track.is_some()) {
            (true, false) => {
                self.send(CustomEvent::MuteTrack(TrackIdData { track_id: track_id.clone() }).into());
                self.notify(Notification::LocalTrackMuted {
                    track_id: track_id.clone(),
                });
            }
            (false, true) => {
                self.send(CustomEvent::UnmuteTrack(TrackIdData { track_id: track_id.clone() }).into());
                self.notify(Notification::LocalTrackUnmuted {
                    track_id: track_id.clone(),
                });
            }
            _ => {}
        }

        if let Some(metadata) = metadata {
            if let Err(e) = self.update_track_metadata(&track_id, metadata) {
                warn!("Metadata update for {} failed: {}", track_id, e);
            }
        }

        self.notify(Notification::LocalTrackReplaced { track_id, track });
        let _ = tx.send(Ok(()));
    }

    /// Hand a registered local track to the engine, if it isn't already.
    pub(crate) fn attach_local_track(&mut self, track_id: &TrackId) -> Result<(), EngineError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let Some(context) = self.registry.local_track_mut(track_id) else {
            return Ok(());
        };
        if context.sender.is_some() {
            return Ok(());
        }
        let Some(track) = context.track.clone() else {
            debug!("Track {} has no media, not attached", track_id);
            return Ok(());
        };

        let mut send_encodings = if context.simulcast_config.enabled && track.kind() == MediaKind::Video {
            simulcast_encodings(&context.simulcast_config.active_encodings)
        } else {
            vec![EncodingParameters::single()]
        };
        apply_bandwidth_limitation(&mut send_encodings, &context.max_bandwidth);

        let init = TransceiverInit {
            direction: Direction::SendOnly,
            stream_id: context
                .stream_id
                .clone()
                .unwrap_or_else(|| track_id.to_string()),
            send_encodings,
        };
        context.sender = Some(engine.add_source(&track, init)?);
        Ok(())
    }

    /// Local media is only ever sent, never received on the same transceiver.
    pub(crate) fn set_sendonly(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        for transceiver in engine.transceivers() {
            if transceiver.direction == Direction::SendRecv {
                engine.set_direction(transceiver.index, Direction::SendOnly);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn try_result_reports_completion_once() {
        let (mut pending, _, tx) = PendingCommand::<()>::channel();
        assert!(pending.try_result().is_none());

        tx.send(Ok(())).unwrap();
        assert_eq!(pending.try_result(), Some(Ok(())));
    }

    #[test]
    fn dropped_sender_means_session_closed() {
        let (pending, _, tx) = PendingCommand::<TrackId>::channel();
        let mut pending = task::spawn(pending);
        assert_pending!(pending.poll());

        drop(tx);
        assert_ready_eq!(pending.poll(), Err(CommandError::SessionClosed));
    }

    #[test]
    fn reject_all_reaches_queued_and_in_flight() {
        let mut queue = CommandQueue::default();
        let (mut in_flight, id, tx) = PendingCommand::<()>::channel();
        queue.in_flight = Some(Resolver::Unit(id, tx));
        let (mut queued, id, tx) = PendingCommand::<()>::channel();
        queue.push(Command::Remove {
            id,
            track_id: TrackId::from("me:1"),
            tx,
        });

        queue.reject_all(CommandError::SessionClosed);

        assert_eq!(queue.len(), 0);
        assert_eq!(in_flight.try_result(), Some(Err(CommandError::SessionClosed)));
        assert_eq!(queued.try_result(), Some(Err(CommandError::SessionClosed)));
    }
}
