//! Instance server: one listening socket serving one simulation instance.

use log::{debug, error, info, warn};
use shared::{Response, LISTEN_BACKLOG};
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::error::ServerError;
use crate::handler::{ConnectionHandler, SessionEnd};
use crate::instance::SimulationInstance;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Counters reported when an instance server stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub sessions: u64,
    pub rejected: u64,
    pub lost: u64,
}

/// Serves one client at a time on a dedicated port. Connections that arrive
/// while a session is live are told the instance is busy and dropped; once a
/// session ends the server goes back to accepting.
pub struct InstanceServer {
    listener: TcpListener,
    instance: SimulationInstance,
    stats: InstanceStats,
}

impl InstanceServer {
    pub fn bind(
        addr: SocketAddr,
        backlog: u32,
        instance: SimulationInstance,
    ) -> Result<Self, ServerError> {
        let listener = Self::listen(addr, backlog).map_err(|source| ServerError::Bind {
            addr,
            source,
        })?;
        info!(
            "Instance {} listening on {}",
            instance.index(),
            listener.local_addr().unwrap_or(addr)
        );

        Ok(Self {
            listener,
            instance,
            stats: InstanceStats::default(),
        })
    }

    fn listen(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn index(&self) -> usize {
        self.instance.index()
    }

    /// Accept loop. Returns when `shutdown` is raised, releasing the listener.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<InstanceStats, ServerError> {
        let index = self.instance.index();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        accept_failed(index, &e).await;
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            info!("Instance {}: client connected from {}", index, peer);
            self.stats.sessions += 1;
            configure_stream(index, &stream);

            let session = ConnectionHandler::new(&mut self.instance).run(stream, shutdown.clone());
            tokio::pin!(session);

            let outcome = loop {
                tokio::select! {
                    biased;
                    outcome = &mut session => break outcome,
                    extra = self.listener.accept() => match extra {
                        Ok((stream, extra_peer)) => {
                            self.stats.rejected += 1;
                            debug!("Instance {}: rejecting {} while busy", index, extra_peer);
                            reject_busy(stream).await;
                        }
                        Err(e) => accept_failed(index, &e).await,
                    }
                }
            };

            match outcome {
                Ok(SessionEnd::PeerClosed) => {
                    info!("Instance {}: client {} disconnected", index, peer);
                }
                Ok(SessionEnd::RequestTooLong) => {
                    warn!("Instance {}: dropped client {} for an oversized request", index, peer);
                }
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => {
                    self.stats.lost += 1;
                    warn!("Instance {}: client {}: {}", index, peer, e);
                }
            }
        }

        if let Some(render) = self.instance.take_render() {
            render.join().await;
        }
        info!("Instance {} shut down ({:?})", index, self.stats);
        Ok(self.stats)
    }
}

/// Pause after a failed accept so a persistent error such as fd exhaustion
/// does not turn the loop into a busy spin.
async fn accept_failed(index: usize, e: &io::Error) {
    warn!(
        "Instance {}: accept failed: {}, retrying in {:?}",
        index, e, ACCEPT_BACKOFF
    );
    sleep(ACCEPT_BACKOFF).await;
}

fn configure_stream(index: usize, stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Instance {}: could not set TCP_NODELAY: {}", index, e);
    }
}

async fn reject_busy(mut stream: TcpStream) {
    let line = Response::Error {
        message: "instance busy".to_string(),
    }
    .encode();
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        error!("Failed to send busy notice: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// Binds with the default backlog.
pub fn bind_instance(
    addr: SocketAddr,
    instance: SimulationInstance,
) -> Result<InstanceServer, ServerError> {
    InstanceServer::bind(addr, LISTEN_BACKLOG, instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{CartPole, DEFAULT_MAX_EPISODE_STEPS};
    use shared::MAX_REQUEST_LEN;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::{sleep, Duration};

    fn instance(index: usize) -> SimulationInstance {
        SimulationInstance::new(
            index,
            Box::new(CartPole::new(Some(index as u64), DEFAULT_MAX_EPISODE_STEPS)),
            false,
        )
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &str,
    ) -> String {
        writer.write_all(request.as_bytes()).await.unwrap();
        lines.next_line().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind(loopback(0)).unwrap();
        let addr = taken.local_addr().unwrap();

        match bind_instance(addr, instance(0)) {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("bind should fail while the port is held"),
        }
    }

    #[tokio::test]
    async fn test_reaccepts_after_disconnect() {
        let server = bind_instance(loopback(0), instance(0)).unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let first = {
            let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut lines = BufReader::new(read).lines();
            let line = roundtrip(&mut lines, &mut write, "reset\n").await;
            assert!(line.starts_with("o:"));
            roundtrip(&mut lines, &mut write, "1\n").await
        };
        assert!(first.starts_with("r:"));
        sleep(Duration::from_millis(50)).await;

        let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut lines = BufReader::new(read).lines();
        assert!(roundtrip(&mut lines, &mut write, "obs\n").await.starts_with("e:"));
        assert!(roundtrip(&mut lines, &mut write, "reset\n").await.starts_with("o:"));
        drop(write);
        drop(lines);

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.lost, 0);
    }

    #[tokio::test]
    async fn test_rejects_second_client_while_busy() {
        let server = bind_instance(loopback(0), instance(1)).unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut lines = BufReader::new(read).lines();
        assert!(roundtrip(&mut lines, &mut write, "reset\n").await.starts_with("o:"));

        let second = TcpStream::connect(addr).await.unwrap();
        let mut second_lines = BufReader::new(second).lines();
        assert_eq!(
            second_lines.next_line().await.unwrap().unwrap(),
            "e:instance busy"
        );

        assert!(roundtrip(&mut lines, &mut write, "0\n").await.starts_with("r:"));

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let server = bind_instance(loopback(0), instance(2)).unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let rebound = bind_instance(addr, instance(2));
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_request_only_drops_that_client() {
        let server = bind_instance(loopback(0), instance(3)).unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        {
            let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut lines = BufReader::new(read).lines();
            let request = format!("{}\n", "a".repeat(2 * MAX_REQUEST_LEN));
            let reply = roundtrip(&mut lines, &mut write, &request).await;
            assert!(reply.starts_with("e:request longer than"));
            assert!(!matches!(lines.next_line().await, Ok(Some(_))));
        }
        sleep(Duration::from_millis(50)).await;

        let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut lines = BufReader::new(read).lines();
        assert!(roundtrip(&mut lines, &mut write, "reset\n").await.starts_with("o:"));
        drop(write);
        drop(lines);

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.lost, 0);
    }

    #[tokio::test]
    async fn test_accept_failure_backs_off() {
        let started = std::time::Instant::now();
        accept_failed(0, &io::Error::from(io::ErrorKind::Other)).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_accepted_stream_disables_nagle() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        configure_stream(0, &stream);
        assert!(stream.nodelay().unwrap());
    }
}
