//! Entry point for the presentation layer

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};

use crate::batch::BatchState;
use crate::config::MonitorConfig;
use crate::monitor::{Control, Monitor, SharedControl, lock_control};
use crate::transport::TagTransport;
use crate::types::{Mode, MonitorEvent, TagError, UriRecord, WriteRequest};

enum Engine<T> {
    Stopped(T),
    Running {
        stop: Sender<()>,
        worker: JoinHandle<T>,
    },
}

/// Owns one reader and the monitor thread polling it.
///
/// The collaborator only posts intent (`set_read_mode`, `set_write_mode`) and
/// consumes [`MonitorEvent`]s; the transport itself is reachable from the
/// monitor thread alone while monitoring runs.
pub struct NfcStation<T: TagTransport + Send + 'static> {
    engine: Option<Engine<T>>,
    control: SharedControl,
    config: MonitorConfig,
    reader_name: String,
    events: Option<Sender<MonitorEvent>>,
}

#[cfg(feature = "pcsc-reader")]
impl NfcStation<crate::pcsc::PcscTransport> {
    /// Open the first matching PC/SC reader
    pub fn initialize(
        reader: &crate::pcsc::PcscConfig,
        config: MonitorConfig,
    ) -> Result<Self, TagError> {
        let transport = crate::pcsc::PcscTransport::open(reader)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: TagTransport + Send + 'static> NfcStation<T> {
    pub fn new(transport: T, config: MonitorConfig) -> Self {
        let reader_name = transport.reader_name().to_string();
        info!("NFC reader initialized: {}", reader_name);
        Self {
            engine: Some(Engine::Stopped(transport)),
            control: Arc::new(Mutex::new(Control::default())),
            config,
            reader_name,
            events: None,
        }
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self.engine, Some(Engine::Running { .. }))
    }

    /// Spawn the monitor thread. Events arrive on the returned channel in
    /// the order operations complete.
    pub fn start_monitoring(&mut self) -> Result<Receiver<MonitorEvent>, TagError> {
        let transport = match self.engine.take() {
            Some(Engine::Stopped(transport)) => transport,
            Some(running @ Engine::Running { .. }) => {
                self.engine = Some(running);
                return Err(TagError::InvalidParameter("monitoring already running".into()));
            }
            None => return Err(TagError::Disconnected("reader handle was lost".into())),
        };

        let (event_tx, event_rx) = crossbeam_channel::bounded(self.config.event_capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let monitor = Monitor::new(
            transport,
            Arc::clone(&self.control),
            event_tx.clone(),
            stop_rx,
            self.config.clone(),
        );

        let worker = std::thread::Builder::new()
            .name("nfc-monitor".into())
            .spawn(move || monitor.run())
            .map_err(|e| TagError::Disconnected(format!("failed to spawn monitor: {}", e)))?;

        self.engine = Some(Engine::Running {
            stop: stop_tx,
            worker,
        });
        self.events = Some(event_tx);
        Ok(event_rx)
    }

    /// Stop the monitor thread, waiting for any operation in flight, and
    /// release the reader.
    pub fn stop_monitoring(&mut self) -> Result<(), TagError> {
        let Some(Engine::Running { stop, worker }) = self.engine.take() else {
            return Ok(());
        };
        let _ = stop.send(());
        self.events = None;

        let mut transport = worker
            .join()
            .map_err(|_| TagError::Disconnected("monitor thread panicked".into()))?;
        let closed = transport
            .close()
            .map_err(|e| TagError::Transport(format!("{:?}", e)));
        self.engine = Some(Engine::Stopped(transport));
        closed
    }

    pub fn set_read_mode(&mut self) {
        {
            let mut control = lock_control(&self.control);
            control.mode = Mode::Read;
            control.generation += 1;
        }
        info!("Switched to read mode");
        self.log("Switched to READ mode - present NFC tag to read".into());
    }

    /// Lock the next presented tag without rewriting it, e.g. to finish a
    /// write that reported `LockFailedAfterWrite`
    pub fn set_lock_mode(&mut self) {
        {
            let mut control = lock_control(&self.control);
            control.mode = Mode::Lock;
            control.generation += 1;
        }
        info!("Switched to lock mode");
        self.log("Switched to LOCK mode - present NFC tag to lock".into());
    }

    /// Arm a write (or batch of writes) for the next presented tags
    pub fn set_write_mode(&mut self, request: WriteRequest) -> Result<(), TagError> {
        request.validate()?;
        let copies = request.copies;
        let uri = request.uri.clone();
        {
            let mut control = lock_control(&self.control);
            control.mode = Mode::Write(request);
            control.generation += 1;
            control.batch.start(copies);
        }
        info!("Write mode armed for {} ({} tags)", uri, copies);
        if copies == 1 {
            self.log(format!("Writing URL: {} - present NFC tag to write", uri));
        } else {
            self.log(format!(
                "Batch write mode: {} tags, URL: {} - present first NFC tag (1/{})",
                copies, uri, copies
            ));
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        lock_control(&self.control).mode.clone()
    }

    /// Batch counters, updated before the matching write event is sent
    pub fn progress(&self) -> BatchState {
        lock_control(&self.control).batch.current()
    }

    /// Most recently read URI
    pub fn last_read(&self) -> Option<UriRecord> {
        lock_control(&self.control).last_read.clone()
    }

    fn log(&self, text: String) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(TrySendError::Full(_)) = events.try_send(MonitorEvent::Log(text)) {
            debug!("Event channel full, log line dropped");
        }
    }
}

impl<T: TagTransport + Send + 'static> Drop for NfcStation<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_monitoring() {
            warn!("Error while shutting down: {}", e);
        }
    }
}
