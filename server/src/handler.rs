//! Per-connection protocol loop.
//!
//! A handler reads one line, answers it with exactly one line, and repeats
//! until the peer closes, the link fails, or the pool is shut down. Client
//! mistakes are answered in-band with `e:` lines and keep the session open,
//! except for a line longer than `MAX_REQUEST_LEN`, which is answered and then
//! closed so a single client cannot grow server memory without bound.

use log::{debug, info, warn};
use shared::{ProtocolError, Request, Response, MAX_REQUEST_LEN};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::watch;

use crate::error::ServerError;
use crate::instance::SimulationInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitingFirstMessage,
    Active,
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    Shutdown,
    /// The peer sent a line longer than `MAX_REQUEST_LEN` and was cut off.
    RequestTooLong,
}

pub struct ConnectionHandler<'a> {
    instance: &'a mut SimulationInstance,
    state: HandlerState,
    /// Set once this connection has seen a reset or a successful step.
    observed: bool,
    requests: u64,
}

impl<'a> ConnectionHandler<'a> {
    pub fn new(instance: &'a mut SimulationInstance) -> Self {
        Self {
            instance,
            state: HandlerState::AwaitingFirstMessage,
            observed: false,
            requests: 0,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Runs the request/response loop over `stream`.
    pub async fn run<S>(
        mut self,
        stream: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionEnd, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        // Bytes of the request being assembled. Only cleared once answered,
        // so a shutdown wakeup mid-line loses nothing.
        let mut line = Vec::new();

        loop {
            if *shutdown.borrow() {
                return Ok(SessionEnd::Shutdown);
            }

            let budget = (MAX_REQUEST_LEN + 1 - line.len()) as u64;
            let mut limited = (&mut reader).take(budget);
            tokio::select! {
                read = limited.read_until(b'\n', &mut line) => {
                    match read {
                        Ok(0) if line.is_empty() => {
                            debug!(
                                "Instance {}: peer closed after {} requests",
                                self.instance.index(),
                                self.requests
                            );
                            return Ok(SessionEnd::PeerClosed);
                        }
                        Ok(_) => {}
                        Err(e) => return Err(ServerError::ConnectionLost(e)),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                    continue;
                }
            }

            if line.len() > MAX_REQUEST_LEN {
                warn!(
                    "Instance {}: request exceeds {} bytes, closing",
                    self.instance.index(),
                    MAX_REQUEST_LEN
                );
                let response = Response::from(ProtocolError::RequestTooLong {
                    limit: MAX_REQUEST_LEN,
                });
                send(&mut writer, &response).await?;
                return Ok(SessionEnd::RequestTooLong);
            }

            if self.state == HandlerState::AwaitingFirstMessage {
                self.activate(&shutdown);
            }

            let response = self.handle_bytes(&line);
            line.clear();
            send(&mut writer, &response).await?;
        }
    }

    fn activate(&mut self, shutdown: &watch::Receiver<bool>) {
        self.state = HandlerState::Active;
        info!("Instance {}: session active", self.instance.index());
        self.instance.ensure_render_started(shutdown);
    }

    /// Answers a single request line.
    pub fn handle_line(&mut self, line: &str) -> Response {
        self.respond(Request::decode(line))
    }

    /// Answers a raw request line as read off the wire.
    pub fn handle_bytes(&mut self, line: &[u8]) -> Response {
        self.respond(Request::decode_bytes(line))
    }

    fn respond(&mut self, decoded: Result<Request, ProtocolError>) -> Response {
        self.requests += 1;
        let index = self.instance.index();

        let request = match decoded {
            Ok(request) => request,
            Err(e) => {
                warn!("Instance {}: {}", index, e);
                return e.into();
            }
        };
        debug!("Instance {}: {:?}", index, request);

        match request {
            Request::Reset => {
                self.observed = true;
                Response::Observation(self.instance.reset())
            }
            Request::ObserveCurrent => {
                if self.observed {
                    Response::Observation(self.instance.current())
                } else {
                    warn!("Instance {}: obs before reset", index);
                    ProtocolError::PrematureObservation.into()
                }
            }
            Request::Info => Response::Info {
                observation_len: self.instance.observation_len(),
                action_count: self.instance.action_count(),
            },
            Request::Act(code) => match self.instance.step(code) {
                Ok(result) => {
                    self.observed = true;
                    Response::Step(result)
                }
                Err(e) => {
                    warn!("Instance {}: {}", index, e);
                    e.into()
                }
            },
        }
    }
}

async fn send<W>(writer: &mut W, response: &Response) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(response.encode().as_bytes())
        .await
        .map_err(ServerError::ConnectionLost)?;
    writer.flush().await.map_err(ServerError::ConnectionLost)
}
