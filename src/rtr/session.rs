//! RTR session engine.
//!
//! A session owns one TCP connection to a validating cache. Two tasks share
//! it: the frame reader decodes inbound PDUs, tracks the session id and
//! serial number, drives the user callback, and answers Serial Notify and
//! Cache Reset with queries; the poller issues a Serial Query at a fixed
//! cadence. The write half sits behind a mutex so the two never interleave
//! a PDU on the wire. The first error either task reports on the session's
//! error channel terminates the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, info, trace, warn};

use crate::error::RtrError;
use crate::rtr::event::Event;
use crate::rtr::pdu::{
    self, Header, Pdu, ResetQuery, SerialQuery, Version, HEADER_LEN, MAX_PDU_LEN,
};

/// Poll cadence. The RFC caps the interval at one hour; some caches drop
/// idle sessions well before that, so poll at 40 minutes.
const POLL_INTERVAL: Duration = Duration::from_secs(40 * 60);

type SharedWriter<S> = Arc<TokioMutex<WriteHalf<S>>>;

/// Snapshot of the session record, handed to the callback by value so it
/// cannot reach back and mutate session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Client {
    /// Cache-chosen session id; `None` until the first PDU that carries one.
    pub session_id: Option<u16>,
    /// Dataset serial; `None` until the first End of Data.
    pub serial_no: Option<u32>,
    pub version: Version,
}

/// Mutable session state shared between the frame reader and the poller.
#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<u16>,
    serial_no: Option<u32>,
}

/// An RTR client session.
pub struct Session {
    version: Version,
    poll_interval: Duration,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(version: Version) -> Self {
        Session {
            version,
            poll_interval: POLL_INTERVAL,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Override the Serial Query poll cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Connect to the cache at `address` (host:port) and run the session.
    ///
    /// Blocks for the lifetime of the session and returns its terminating
    /// error. Reconnection is the caller's responsibility.
    pub async fn dial<F>(self, address: &str, callback: F) -> Result<(), RtrError>
    where
        F: FnMut(Event, Client) + Send + Sync + 'static,
    {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        info!(address, version = %self.version, "connected to RPKI cache");
        self.run(stream, callback).await
    }

    /// Run the session over an established stream.
    ///
    /// Sends the initial Reset Query, spawns the frame reader and the
    /// poller, and waits for the first error either reports. The connection
    /// is shut down on every exit path and both tasks are joined before
    /// this returns.
    pub async fn run<S, F>(self, stream: S, callback: F) -> Result<(), RtrError>
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
        F: FnMut(Event, Client) + Send + Sync + 'static,
    {
        {
            let mut state = self.state.lock().unwrap();
            state.session_id = None;
            state.serial_no = None;
        }

        let (read_half, write_half) = split(stream);
        let writer: SharedWriter<S> = Arc::new(TokioMutex::new(write_half));

        send_bytes(&writer, &ResetQuery { version: self.version }.to_bytes()).await?;
        debug!(version = %self.version, "sent initial reset query");

        let (err_tx, mut err_rx) = mpsc::channel::<RtrError>(2);

        let reader = Reader {
            version: self.version,
            read_half,
            writer: Arc::clone(&writer),
            state: Arc::clone(&self.state),
            callback,
        };
        let reader_err = err_tx.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(e) = reader.run().await {
                let _ = reader_err.send(e).await;
            }
        });

        let version = self.version;
        let interval = self.poll_interval;
        let poller_state = Arc::clone(&self.state);
        let poller_writer = Arc::clone(&writer);
        let poller_task = tokio::spawn(async move {
            if let Err(e) = poll_loop(version, interval, poller_state, poller_writer).await {
                let _ = err_tx.send(e).await;
            }
        });

        let cause = err_rx.recv().await;

        reader_task.abort();
        poller_task.abort();
        let _ = reader_task.await;
        let _ = poller_task.await;

        {
            let mut write_half = writer.lock().await;
            let _ = write_half.shutdown().await;
        }

        match cause {
            Some(err) => {
                warn!(error = %err, "RTR session ended");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// Connect to the cache at `address` and run an RTR session under the given
/// protocol version, invoking `callback` for every event.
pub async fn dial<F>(address: &str, version: Version, callback: F) -> Result<(), RtrError>
where
    F: FnMut(Event, Client) + Send + Sync + 'static,
{
    Session::new(version).dial(address, callback).await
}

/// The frame-reader task: reads length-prefixed PDUs, decodes them, updates
/// session state, and drives the callback.
struct Reader<S, F> {
    version: Version,
    read_half: ReadHalf<S>,
    writer: SharedWriter<S>,
    state: Arc<Mutex<SessionState>>,
    callback: F,
}

impl<S, F> Reader<S, F>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    F: FnMut(Event, Client) + Send + Sync + 'static,
{
    async fn run(mut self) -> Result<(), RtrError> {
        loop {
            let (header, payload) = self.read_pdu().await?;
            let pdu = pdu::decode(self.version, &header, &payload)?;
            self.dispatch(pdu).await?;
        }
    }

    /// Read one raw PDU off the socket, iterating until the full header and
    /// payload are buffered.
    async fn read_pdu(&mut self) -> Result<(Header, Vec<u8>), RtrError> {
        let mut raw = [0u8; HEADER_LEN];
        self.read_half.read_exact(&mut raw).await?;
        let header = Header::parse(raw);

        if header.version != self.version.as_u8() {
            return Err(RtrError::VersionMismatch {
                expected: self.version.as_u8(),
                got: header.version,
            });
        }
        if header.length > MAX_PDU_LEN {
            return Err(RtrError::Oversized(header.length));
        }
        if (header.length as usize) < HEADER_LEN {
            return Err(RtrError::BadLength(header.length));
        }

        let mut payload = vec![0u8; header.length as usize - HEADER_LEN];
        if !payload.is_empty() {
            self.read_half.read_exact(&mut payload).await?;
        }
        trace!(pdu_type = header.pdu_type, length = header.length, "read PDU");
        Ok((header, payload))
    }

    async fn dispatch(&mut self, pdu: Pdu) -> Result<(), RtrError> {
        match pdu {
            Pdu::SerialNotify { session_id, serial } => {
                self.check_session_id(session_id)?;
                let stored = self.state.lock().unwrap().serial_no;
                let current = match stored {
                    Some(current) => current.to_string(),
                    None => "unknown".to_string(),
                };
                self.emit(Event::info(format!(
                    "Serial Notify #{} -> #{}",
                    current, serial
                )));
                match stored {
                    // No serial to ask from yet, resync from scratch.
                    None => self.send_reset_query().await?,
                    Some(stored) if stored != serial => self.send_serial_query().await?,
                    Some(_) => {}
                }
            }
            Pdu::CacheResponse { session_id } => {
                self.check_session_id(session_id)?;
                self.emit(Event::info(format!(
                    "Cache Response, session is {}",
                    session_id
                )));
            }
            Pdu::Prefix(prefix) => {
                self.emit(Event::prefix(prefix));
            }
            Pdu::EndOfData {
                session_id,
                serial,
                timers,
            } => {
                self.check_session_id(session_id)?;
                if let Some(timers) = timers {
                    debug!(
                        refresh = timers.refresh,
                        retry = timers.retry,
                        expire = timers.expire,
                        "end of data timers"
                    );
                }
                self.state.lock().unwrap().serial_no = Some(serial);
                self.emit(Event::info("(Temporary) End of Data".to_string()));
            }
            Pdu::CacheReset => {
                // The cache lost its history; start over with a full dataset.
                self.emit(Event::info("Cache reset".to_string()));
                self.send_reset_query().await?;
            }
            Pdu::RouterKey => {
                self.emit(Event::info("Router Key (ignored)".to_string()));
            }
            Pdu::ErrorReport { code, text } => {
                return Err(RtrError::ErrorReport { code, text });
            }
        }
        Ok(())
    }

    /// Adopt the incoming session id if none is established yet, otherwise
    /// require equality.
    fn check_session_id(&mut self, incoming: u16) -> Result<(), RtrError> {
        let mut state = self.state.lock().unwrap();
        match state.session_id {
            None => {
                state.session_id = Some(incoming);
                Ok(())
            }
            Some(expected) if expected == incoming => Ok(()),
            Some(expected) => Err(RtrError::SessionIdMismatch {
                expected,
                got: incoming,
            }),
        }
    }

    fn emit(&mut self, event: Event) {
        let snapshot = {
            let state = self.state.lock().unwrap();
            Client {
                session_id: state.session_id,
                serial_no: state.serial_no,
                version: self.version,
            }
        };
        (self.callback)(event, snapshot);
    }

    async fn send_reset_query(&self) -> Result<(), RtrError> {
        debug!("sending reset query");
        send_bytes(&self.writer, &ResetQuery { version: self.version }.to_bytes()).await
    }

    async fn send_serial_query(&self) -> Result<(), RtrError> {
        let query = serial_query_from_state(self.version, &self.state)?;
        debug!(
            session_id = query.session_id,
            serial = query.serial,
            "sending serial query"
        );
        send_bytes(&self.writer, &query.to_bytes()).await
    }
}

/// The poller task: one Serial Query per interval, forever. Any failure,
/// including firing before an End of Data has established the session id
/// and serial, terminates the session.
async fn poll_loop<S>(
    version: Version,
    interval: Duration,
    state: Arc<Mutex<SessionState>>,
    writer: SharedWriter<S>,
) -> Result<(), RtrError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        tokio::time::sleep(interval).await;
        let query = serial_query_from_state(version, &state)?;
        debug!(
            session_id = query.session_id,
            serial = query.serial,
            "periodic serial query"
        );
        send_bytes(&writer, &query.to_bytes()).await?;
    }
}

fn serial_query_from_state(
    version: Version,
    state: &Arc<Mutex<SessionState>>,
) -> Result<SerialQuery, RtrError> {
    let state = state.lock().unwrap();
    match (state.session_id, state.serial_no) {
        (Some(session_id), Some(serial)) => Ok(SerialQuery {
            version,
            session_id,
            serial,
        }),
        _ => Err(RtrError::MissingSessionState),
    }
}

/// Write one whole PDU under the writer lock; a partial write surfaces as
/// an I/O error from `write_all`.
async fn send_bytes<S>(writer: &SharedWriter<S>, bytes: &[u8]) -> Result<(), RtrError>
where
    S: AsyncWrite,
{
    let mut write_half = writer.lock().await;
    write_half.write_all(bytes).await?;
    write_half.flush().await?;
    Ok(())
}
