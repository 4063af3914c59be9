use crate::types::TagId;

/// Trait for NFC reader communication backends.
/// Implement this trait for different reader stacks (PC/SC, libnfc, etc.)
///
/// A transport has a single owner at a time and every exchange takes
/// `&mut self`, so commands to one reader never interleave.
pub trait TagTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Human-readable name of the attached reader
    fn reader_name(&self) -> &str;

    /// Check for a tag in the field. Must return within tens of milliseconds.
    fn poll(&mut self) -> Result<Option<TagId>, Self::Error>;

    /// Send one command frame and return the response frame, status word included
    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// Release the reader. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
