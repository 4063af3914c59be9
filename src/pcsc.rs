//! PC/SC transport for desktop contactless readers using the pcsc crate

use std::ffi::{CStr, CString};

use log::{debug, info, warn};
use pcsc::{Card, Context, Disposition, MAX_BUFFER_SIZE, Protocols, Scope, ShareMode};

use crate::apdu;
use crate::transport::TagTransport;
use crate::types::{TagError, TagId};

/// Which reader to open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PcscConfig {
    /// Case-insensitive substring of the reader name, e.g. "ACR1252".
    /// The first reader is used when unset.
    pub reader_filter: Option<String>,
}

impl PcscConfig {
    pub fn with_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.reader_filter = Some(filter.into());
        self
    }
}

pub struct PcscTransport {
    ctx: Context,
    reader: CString,
    name: String,
    card: Option<Card>,
    /// Set after a service-level failure; the context is rebuilt on the next poll
    stale_context: bool,
}

impl PcscTransport {
    /// Enumerate readers and open the first one matching `config`
    pub fn open(config: &PcscConfig) -> Result<Self, TagError> {
        let ctx = Context::establish(Scope::User).map_err(|e| {
            warn!("PC/SC service unavailable: {}", e);
            TagError::NoReaderFound
        })?;

        let mut readers_buf = [0; 2048];
        let readers = match ctx.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Err(TagError::NoReaderFound),
            Err(e) => return Err(TagError::Transport(format!("{:?}", e))),
        };

        let filter = config.reader_filter.as_deref().map(str::to_lowercase);
        let reader = readers
            .filter(|name| match &filter {
                Some(filter) => name.to_string_lossy().to_lowercase().contains(filter),
                None => true,
            })
            .map(CStr::to_owned)
            .next()
            .ok_or(TagError::NoReaderFound)?;

        let name = reader.to_string_lossy().into_owned();
        info!("Using reader: {}", name);
        Ok(Self {
            ctx,
            reader,
            name,
            card: None,
            stale_context: false,
        })
    }

    fn refresh_context(&mut self) -> Result<(), pcsc::Error> {
        if self.stale_context {
            debug!("Re-establishing PC/SC context");
            self.ctx = Context::establish(Scope::User)?;
            self.stale_context = false;
        }
        Ok(())
    }

    fn read_uid(card: &Card) -> Result<Vec<u8>, pcsc::Error> {
        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = card.transmit(&apdu::get_uid(), &mut response_buf)?;
        // A tag without a UID answer is treated as absent
        Ok(apdu::check_status(response).map(<[u8]>::to_vec).unwrap_or_default())
    }

    fn drop_card(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
                debug!("Disconnect after removal: {}", e);
            }
        }
    }

    fn note_failure(&mut self, err: pcsc::Error) -> pcsc::Error {
        if matches!(
            err,
            pcsc::Error::NoService | pcsc::Error::ServiceStopped | pcsc::Error::InvalidHandle
        ) {
            self.stale_context = true;
        }
        err
    }
}

impl TagTransport for PcscTransport {
    type Error = pcsc::Error;

    fn reader_name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> Result<Option<TagId>, Self::Error> {
        if let Some(card) = &self.card {
            match Self::read_uid(card) {
                Ok(uid) if !uid.is_empty() => return Ok(Some(TagId::new(uid))),
                Ok(_) => {}
                Err(e) => debug!("Connected tag stopped answering: {}", e),
            }
            // Report the gap so a re-presented tag counts as a new presentation
            self.drop_card();
            return Ok(None);
        }

        self.refresh_context().map_err(|e| self.note_failure(e))?;
        match self.ctx.connect(&self.reader, ShareMode::Shared, Protocols::ANY) {
            Ok(card) => {
                let uid = Self::read_uid(&card).map_err(|e| self.note_failure(e))?;
                if uid.is_empty() {
                    return Ok(None);
                }
                self.card = Some(card);
                Ok(Some(TagId::new(uid)))
            }
            Err(
                pcsc::Error::NoSmartcard
                | pcsc::Error::RemovedCard
                | pcsc::Error::UnpoweredCard
                | pcsc::Error::UnresponsiveCard,
            ) => Ok(None),
            Err(e) => Err(self.note_failure(e)),
        }
    }

    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let card = self.card.as_ref().ok_or(pcsc::Error::NoSmartcard)?;
        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = card.transmit(command, &mut response_buf)?;
        Ok(response.to_vec())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.drop_card();
        Ok(())
    }
}
