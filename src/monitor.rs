//! Background polling loop
//!
//! The monitor is the only caller of the reader transport. The collaborator
//! talks to it through the shared [`Control`] cell and listens on the event
//! channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::batch::{BatchController, BatchProgress};
use crate::config::MonitorConfig;
use crate::reader::TagReader;
use crate::transport::TagTransport;
use crate::types::{
    LockStatus, Mode, MonitorEvent, OperationOutcome, ReaderStatus, TagError, TagId, UriRecord,
    WriteRequest, WriteStatus,
};

/// Intent posted by the collaborator, plus the state the monitor reports back
#[derive(Debug, Default)]
pub(crate) struct Control {
    pub mode: Mode,
    /// Bumped on every mode change so stale writes do not count toward a new batch
    pub generation: u64,
    pub batch: BatchController,
    pub last_read: Option<UriRecord>,
}

pub(crate) type SharedControl = Arc<Mutex<Control>>;

pub(crate) fn lock_control(control: &Mutex<Control>) -> MutexGuard<'_, Control> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Monitor<T: TagTransport> {
    reader: TagReader<T>,
    control: SharedControl,
    events: Sender<MonitorEvent>,
    stop: Receiver<()>,
    stopping: bool,
    config: MonitorConfig,
    /// Tag handled during the current presentation
    present: Option<TagId>,
    failures: u32,
    degraded: bool,
}

impl<T: TagTransport> Monitor<T> {
    pub fn new(
        transport: T,
        control: SharedControl,
        events: Sender<MonitorEvent>,
        stop: Receiver<()>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            reader: TagReader::new(transport).with_default_capacity(config.default_capacity),
            control,
            events,
            stop,
            stopping: false,
            config,
            present: None,
            failures: 0,
            degraded: false,
        }
    }

    /// Poll until the stop signal fires or its sender is dropped, then hand
    /// the transport back.
    ///
    /// The stop signal is only observed between polls and while delivering
    /// events, so an operation in flight always completes first.
    pub fn run(mut self) -> T {
        info!("Monitoring reader {}", self.reader.reader_name());
        while !self.stopping {
            let pause = self.tick();
            if self.stopping {
                break;
            }
            match self.stop.recv_timeout(pause) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Monitoring stopped");
        self.reader.into_transport()
    }

    /// One poll iteration. Returns how long to wait before the next one.
    pub fn tick(&mut self) -> Duration {
        match self.reader.poll() {
            Ok(Some(id)) => {
                self.poll_recovered();
                if self.present.as_ref() != Some(&id) {
                    debug!("Tag {} presented", id);
                    self.present = Some(id.clone());
                    self.dispatch(&id);
                }
            }
            Ok(None) => {
                self.poll_recovered();
                if let Some(id) = self.present.take() {
                    debug!("Tag {} removed", id);
                }
            }
            Err(e) => self.poll_failed(e),
        }

        if self.degraded {
            self.config.degraded_poll_interval
        } else {
            self.config.poll_interval
        }
    }

    #[cfg(test)]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    #[cfg(test)]
    pub fn reader(&self) -> &TagReader<T> {
        &self.reader
    }

    fn poll_recovered(&mut self) {
        self.failures = 0;
        if self.degraded {
            self.degraded = false;
            info!("Reader {} is answering again", self.reader.reader_name());
            self.send(MonitorEvent::Status(ReaderStatus::Connected(
                self.reader.reader_name().to_string(),
            )));
        }
    }

    /// A single failed poll says nothing about the tag; the presentation guard
    /// is only dropped once the reader counts as disconnected.
    fn poll_failed(&mut self, err: TagError) {
        self.failures += 1;
        if self.degraded {
            debug!("Reader still unavailable: {}", err);
            return;
        }
        warn!("Poll failed ({}/{}): {}", self.failures, self.config.disconnect_threshold, err);
        if self.failures >= self.config.disconnect_threshold {
            self.degraded = true;
            self.present = None;
            error!("Reader {} disconnected: {}", self.reader.reader_name(), err);
            self.send(MonitorEvent::Status(ReaderStatus::Disconnected(err.to_string())));
        }
    }

    fn dispatch(&mut self, id: &TagId) {
        let (mode, generation) = {
            let control = lock_control(&self.control);
            (control.mode.clone(), control.generation)
        };

        match mode {
            Mode::Read => self.handle_read(id),
            Mode::Write(request) => self.handle_write(id, &request, generation),
            Mode::Lock => self.handle_lock(id, generation),
            Mode::Idle => {
                info!("Tag {} ignored: no write request pending", id);
                self.log(format!("Tag {} ignored: no write request pending", id));
            }
        }
    }

    fn handle_read(&mut self, id: &TagId) {
        match self.attempt(id, |reader| reader.read_tag()) {
            OperationOutcome::Success(record) => {
                info!("Tag {} read: {}", id, record);
                lock_control(&self.control).last_read = Some(record.clone());
                self.send(MonitorEvent::Read(record));
            }
            OperationOutcome::Retryable(err) | OperationOutcome::Fatal(err) => {
                self.log(format!("Tag {}: {}", id, err));
            }
        }
    }

    fn handle_write(&mut self, id: &TagId, request: &WriteRequest, generation: u64) {
        let result = self.attempt(id, |reader| reader.write_tag(request)).into_result();

        let progress = {
            let mut control = lock_control(&self.control);
            if result.is_ok() && control.generation == generation {
                if let Some(BatchProgress::Complete { total }) = control.batch.on_write_success() {
                    info!("Batch of {} tags complete", total);
                    control.mode = Mode::Idle;
                }
            }
            control.batch.current()
        };

        if let Err(err) = &result {
            if err.modified_tag() {
                error!("Tag {} holds new data but is not locked: {}", id, err);
            }
        }
        self.send(MonitorEvent::Write(WriteStatus {
            tag: id.clone(),
            result,
            progress,
        }));
    }

    /// One tag per lock request; a failed lock leaves lock mode armed for
    /// the next presentation.
    fn handle_lock(&mut self, id: &TagId, generation: u64) {
        let result = self.attempt(id, |reader| reader.lock_tag()).into_result();
        match &result {
            Ok(()) => {
                info!("Tag {} locked", id);
                let mut control = lock_control(&self.control);
                if control.generation == generation {
                    control.mode = Mode::Idle;
                }
            }
            Err(err) => warn!("Lock of tag {} failed: {}", id, err),
        }
        self.send(MonitorEvent::Lock(LockStatus {
            tag: id.clone(),
            result,
        }));
    }

    /// Run `op`, retrying retryable failures only while a fresh poll still
    /// sees the same tag.
    fn attempt<R>(
        &mut self,
        id: &TagId,
        mut op: impl FnMut(&mut TagReader<T>) -> Result<R, TagError>,
    ) -> OperationOutcome<R> {
        let mut attempt = 1;
        loop {
            let outcome = OperationOutcome::from(op(&mut self.reader));
            let OperationOutcome::Retryable(err) = outcome else {
                return outcome;
            };
            if attempt >= self.config.max_attempts {
                return OperationOutcome::Retryable(err);
            }

            match self.reader.poll() {
                Ok(Some(current)) if current == *id => {
                    attempt += 1;
                    warn!("Retrying tag {} (attempt {}): {}", id, attempt, err);
                }
                Ok(_) => {
                    debug!("Tag {} left before retry", id);
                    self.present = None;
                    return OperationOutcome::Retryable(err);
                }
                Err(e) => {
                    debug!("Re-probe for tag {} failed: {}", id, e);
                    return OperationOutcome::Retryable(err);
                }
            }
        }
    }

    /// Deliver a read/write/status event. Blocks while the channel is full,
    /// unless a stop is requested meanwhile.
    fn send(&mut self, event: MonitorEvent) {
        if self.stopping {
            return;
        }
        let (events, stop) = (&self.events, &self.stop);
        let mut stop_requested = false;
        crossbeam_channel::select! {
            send(events, event) -> res => {
                if res.is_err() {
                    debug!("Event receiver dropped");
                }
            }
            recv(stop) -> _ => {
                debug!("Stop requested while delivering an event");
                stop_requested = true;
            }
        }
        self.stopping |= stop_requested;
    }

    /// Deliver a log line, dropping it if the collaborator is not keeping up
    fn log(&self, text: String) {
        match self.events.try_send(MonitorEvent::Log(text)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Event channel full, log line dropped"),
            Err(TrySendError::Disconnected(_)) => debug!("Event receiver dropped"),
        }
    }
}
