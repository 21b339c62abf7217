use log::debug;
use shared::{Observation, ProtocolError, Request, Response, StepResult};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server error: {message}")]
    Server { message: String },

    #[error("unexpected response to {request:?}: {response:?}")]
    Unexpected {
        request: Request,
        response: Response,
    },

    #[error("server closed the connection")]
    Disconnected,
}

/// Action space announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpace {
    pub observation_len: usize,
    pub action_count: u32,
}

/// Connection to one simulation instance.
pub struct SimClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl SimClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
        })
    }

    /// Sends one request and reads its single response line.
    pub async fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        self.writer.write_all(request.encode().as_bytes()).await?;
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or(ClientError::Disconnected)?;

        match Response::decode(&line)? {
            Response::Error { message } => Err(ClientError::Server { message }),
            response => Ok(response),
        }
    }

    pub async fn info(&mut self) -> Result<ActionSpace, ClientError> {
        match self.request(Request::Info).await? {
            Response::Info {
                observation_len,
                action_count,
            } => Ok(ActionSpace {
                observation_len,
                action_count,
            }),
            response => Err(ClientError::Unexpected {
                request: Request::Info,
                response,
            }),
        }
    }

    pub async fn reset(&mut self) -> Result<Observation, ClientError> {
        self.expect_observation(Request::Reset).await
    }

    pub async fn observe(&mut self) -> Result<Observation, ClientError> {
        self.expect_observation(Request::ObserveCurrent).await
    }

    pub async fn step(&mut self, action: i64) -> Result<StepResult, ClientError> {
        let request = Request::Act(action);
        match self.request(request).await? {
            Response::Step(result) => Ok(result),
            response => Err(ClientError::Unexpected { request, response }),
        }
    }

    async fn expect_observation(&mut self, request: Request) -> Result<Observation, ClientError> {
        match self.request(request).await? {
            Response::Observation(observation) => Ok(observation),
            response => Err(ClientError::Unexpected { request, response }),
        }
    }
}
