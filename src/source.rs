use crate::recorded::RecordedDevice;
use crate::sunspec::RegisterAddress;
use std::future::Future;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("device responded with modbus exception code {0}")]
    Exception(u8),
    #[error("register {0} is not part of the recording")]
    Unmapped(RegisterAddress),
    #[error("no response to the request within {0:?}")]
    Timeout(Duration),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the device closed the connection")]
    ConnectionClosed,
    #[error("the register source has already been closed")]
    Closed,
    #[error("response carried {1} registers but {0} were requested")]
    ShortResponse(u16, usize),
}

impl Error {
    /// Whether the device answered, but there is nothing at the requested address.
    ///
    /// While probing for the SunSpec marker such answers mean "not here" rather than a broken
    /// transport.
    pub fn is_absent_register(&self) -> bool {
        // 2 is the "Illegal Data Address" exception.
        matches!(self, Error::Exception(2) | Error::Unmapped(_))
    }
}

/// Anything that can supply 16-bit register words by address.
///
/// Implementations own their connection; discovery reads from them strictly sequentially and
/// calls [`RegisterSource::close`] exactly once it is done, on every exit path.
pub trait RegisterSource {
    /// Read `count` consecutive words starting at `address`.
    fn read(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, Error>> + Send;

    /// Release the underlying connection. Calling this more than once is fine.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Passes reads through to `S` and remembers every word that came back.
pub struct Recording<S> {
    inner: S,
    captured: RecordedDevice,
}

impl<S> Recording<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, captured: RecordedDevice::new() }
    }

    pub fn captured(&self) -> &RecordedDevice {
        &self.captured
    }

    pub fn into_parts(self) -> (S, RecordedDevice) {
        (self.inner, self.captured)
    }
}

impl<S: RegisterSource + Send> RegisterSource for Recording<S> {
    async fn read(&mut self, address: RegisterAddress, count: u16) -> Result<Vec<u16>, Error> {
        let words = self.inner.read(address, count).await?;
        self.captured.set_values(address, &words);
        Ok(words)
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}
