use crate::modbus::{self, MAX_SAFE_READ_COUNT, ModbusTCPCodec, Operation, Request, ResponseKind};
use crate::recorded::{self, RecordedDevice};
use crate::source::{self, RegisterSource};
use crate::sunspec::{MODBUS_TCP_PORT, RegisterAddress, STANDARD_UNIT_ID};
use futures::{SinkExt as _, StreamExt as _};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not read the register recording at {1:?}")]
    ReadRecording(#[source] std::io::Error, PathBuf),
    #[error("could not parse the register recording at {1:?}")]
    ParseRecording(#[source] recorded::Error, PathBuf),
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// The modbus unit ID of the SunSpec device.
    #[arg(long, short = 'i', default_value_t = STANDARD_UNIT_ID)]
    unit_id: u8,

    /// If the modbus response isn't received in this amount of time, consider the read failed.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// How many times to repeat a read the device rejected as busy (exception code 6).
    #[arg(long, default_value = "3")]
    busy_retries: usize,

    /// The amount of time to wait after receiving a server busy exception.
    ///
    /// When busy, modbus proxies can respond with an exception code 6. Give the device
    /// this amount of time to finish its current work before retrying.
    #[arg(long, default_value = "25ms")]
    busy_retry_delay: humantime::Duration,
}

#[derive(clap::Parser, Clone)]
#[group(required = true)]
pub struct ConnectionGroup {
    /// Connect to the device over Modbus TCP (`host` or `host:port`, port defaults to 502).
    #[arg(long)]
    tcp: Option<String>,
    /// Replay a register recording (as written by `discover --record`) instead of a device.
    #[arg(long)]
    recording: Option<PathBuf>,
}

impl Args {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            how: ConnectionGroup { tcp: Some(address.into()), recording: None },
            unit_id: STANDARD_UNIT_ID,
            read_timeout: Duration::from_secs(1).into(),
            busy_retries: 3,
            busy_retry_delay: Duration::from_millis(25).into(),
        }
    }

    pub async fn open(&self) -> Result<Connection, Error> {
        if let Some(address) = &self.how.tcp {
            Ok(Connection::Tcp(TcpSource::connect(address, self).await?))
        } else if let Some(path) = &self.how.recording {
            info!(message = "loading recording", ?path);
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::ReadRecording(e, path.clone()))?;
            let device =
                RecordedDevice::parse(&text).map_err(|e| Error::ParseRecording(e, path.clone()))?;
            Ok(Connection::Recorded(device))
        } else {
            panic!("both `--tcp` and `--recording` are `None`?");
        }
    }
}

/// Whichever register source the command line asked for.
pub enum Connection {
    Tcp(TcpSource),
    Recorded(RecordedDevice),
}

impl RegisterSource for Connection {
    async fn read(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> Result<Vec<u16>, source::Error> {
        match self {
            Connection::Tcp(tcp) => tcp.read(address, count).await,
            Connection::Recorded(recorded) => recorded.read(address, count).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Connection::Tcp(tcp) => tcp.close().await,
            Connection::Recorded(recorded) => recorded.close().await,
        }
    }
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// A Modbus TCP device, spoken to one request at a time.
pub struct TcpSource {
    io: Option<TcpIo>,
    unit_id: u8,
    read_timeout: Duration,
    busy_retries: usize,
    busy_retry_delay: Duration,
    next_transaction_id: u16,
}

impl TcpSource {
    pub async fn connect(address: &str, args: &Args) -> Result<Self, Error> {
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{MODBUS_TCP_PORT}")
        };
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        Ok(Self {
            io: Some(Framed::new(socket, ModbusTCPCodec {})),
            unit_id: args.unit_id,
            read_timeout: *args.read_timeout,
            busy_retries: args.busy_retries,
            busy_retry_delay: *args.busy_retry_delay,
            next_transaction_id: 0,
        })
    }

    fn new_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Send one request and wait for the response carrying the same transaction id.
    async fn send(&mut self, operation: Operation) -> Result<modbus::Response, source::Error> {
        let transaction_id = self.new_transaction_id();
        let request = Request { device_id: self.unit_id, transaction_id, operation };
        let read_timeout = self.read_timeout;
        let io = self.io.as_mut().ok_or(source::Error::Closed)?;
        io.send(request).await.map_err(source::Error::Send)?;
        loop {
            let next = tokio::time::timeout(read_timeout, io.next())
                .await
                .map_err(|_| source::Error::Timeout(read_timeout))?;
            match next {
                None => return Err(source::Error::ConnectionClosed),
                Some(Err(e)) => return Err(source::Error::Receive(e)),
                Some(Ok(response)) if response.transaction_id == transaction_id => {
                    return Ok(response);
                }
                Some(Ok(response)) => {
                    debug!(
                        message = "a response we were not expecting",
                        transaction = response.transaction_id,
                        expected = transaction_id
                    );
                }
            }
        }
    }

    /// [`Self::send`] but retries `Server Busy` exceptions.
    async fn send_retrying(
        &mut self,
        operation: Operation,
    ) -> Result<modbus::Response, source::Error> {
        let mut retries = self.busy_retries;
        loop {
            let response = self.send(operation).await?;
            if response.is_server_busy() && retries > 0 {
                retries -= 1;
                debug!(message = "device busy, retrying", retries_left = retries);
                tokio::time::sleep(self.busy_retry_delay).await;
                continue;
            }
            break Ok(response);
        }
    }

    async fn read_chunk(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> Result<Vec<u16>, source::Error> {
        let response = self.send_retrying(Operation::read(address, count)).await?;
        match response.kind {
            ResponseKind::ErrorCode(code) => Err(source::Error::Exception(code)),
            ResponseKind::Registers { values } => {
                let words = ResponseKind::words(&values).collect::<Vec<_>>();
                if words.len() != usize::from(count) {
                    return Err(source::Error::ShortResponse(count, words.len()));
                }
                Ok(words)
            }
        }
    }
}

impl RegisterSource for TcpSource {
    async fn read(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> Result<Vec<u16>, source::Error> {
        let mut words = Vec::with_capacity(usize::from(count));
        for (start, count) in chunks(address, count) {
            trace!(message = "reading", address = %start, count);
            words.extend(self.read_chunk(start, count).await?);
        }
        Ok(words)
    }

    async fn close(&mut self) {
        let Some(mut io) = self.io.take() else {
            return;
        };
        match io.close().await {
            Ok(()) => info!(message = "disconnected"),
            Err(e) => warn!(
                message = "could not shut down the connection cleanly",
                error = (&e as &dyn std::error::Error)
            ),
        }
    }
}

/// Split a read into requests of at most [`MAX_SAFE_READ_COUNT`] registers.
fn chunks(address: RegisterAddress, count: u16) -> impl Iterator<Item = (RegisterAddress, u16)> {
    (0..count).step_by(usize::from(MAX_SAFE_READ_COUNT)).map_while(move |done| {
        let start = address.checked_add(u32::from(done))?;
        Some((start, (count - done).min(MAX_SAFE_READ_COUNT)))
    })
}
