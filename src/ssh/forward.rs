// 本地端口转发：独立的 SSH 连接和线程，stop() 后退出
use crate::ssh::client::{KeyAuth, SshClient};
use crate::ssh::profile::ConnectParams;
use crate::utils::error::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_LOCAL_HOST: &str = "0.0.0.0";
pub const DEFAULT_LOCAL_PORT: u16 = 44556;

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const BUFFER_SIZE: usize = 32 * 1024;

/// Where to listen and where to tunnel to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub remote_host: String,
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
}

impl ForwardSpec {
    pub fn new(remote_host: impl Into<String>, remote_port: u16) -> Self {
        ForwardSpec {
            remote_host: remote_host.into(),
            remote_port,
            local_host: DEFAULT_LOCAL_HOST.to_string(),
            local_port: DEFAULT_LOCAL_PORT,
        }
    }

    pub fn local(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_host = host.into();
        self.local_port = port;
        self
    }
}

/// Handle to a running forward.
pub struct LocalForwarder {
    pub spec: ForwardSpec,
    /// Actual bound address (differs from the request when port 0 was asked).
    pub local_addr: SocketAddr,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl LocalForwarder {
    pub fn start(params: &ConnectParams, auth: &KeyAuth, spec: ForwardSpec) -> Result<Self> {
        let client = SshClient::connect(params, auth)?;
        let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!(
            "Forwarding {} -> {}:{} via {}",
            local_addr,
            spec.remote_host,
            spec.remote_port,
            params.address()
        );

        let (stop_tx, stop_rx) = bounded(1);
        let target = (spec.remote_host.clone(), spec.remote_port);
        let thread = thread::Builder::new()
            .name(format!("issho-forward-{}", local_addr.port()))
            .spawn(move || {
                if let Err(e) = run(client.session, listener, target, stop_rx) {
                    warn!("Port forward on {} stopped: {}", local_addr, e);
                }
            })?;

        Ok(LocalForwarder {
            spec,
            local_addr,
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn is_active(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Closes the listener and every open tunnel, then waits for the thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        info!("Stopping local port forward on {}", self.local_addr);
        let _ = self.stop_tx.try_send(());
        if thread.join().is_err() {
            warn!("Port forward thread on {} panicked", self.local_addr);
        }
    }
}

impl Drop for LocalForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    session: Session,
    listener: TcpListener,
    (remote_host, remote_port): (String, u16),
    stop_rx: Receiver<()>,
) -> Result<()> {
    let mut tunnels: Vec<Tunnel> = Vec::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    session.set_blocking(false);

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let mut busy = false;
        match listener.accept() {
            Ok((stream, peer)) => {
                busy = true;
                match open_tunnel(&session, stream, peer, &remote_host, remote_port) {
                    Ok(tunnel) => tunnels.push(tunnel),
                    Err(e) => warn!("Could not open tunnel for {}: {}", peer, e),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        tunnels.retain_mut(|tunnel| match tunnel.pump(&mut buffer) {
            Ok(progress) => {
                busy |= progress;
                if tunnel.finished() {
                    debug!("Tunnel for {} closed", tunnel.peer);
                    tunnel.close();
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                debug!("Tunnel for {} failed: {}", tunnel.peer, e);
                tunnel.close();
                false
            }
        });

        if !busy {
            thread::sleep(IDLE_SLEEP);
        }
    }

    for tunnel in &mut tunnels {
        tunnel.close();
    }
    Ok(())
}

fn open_tunnel(
    session: &Session,
    stream: TcpStream,
    peer: SocketAddr,
    remote_host: &str,
    remote_port: u16,
) -> Result<Tunnel> {
    // 打开通道时临时切回阻塞模式
    session.set_blocking(true);
    let channel = session.channel_direct_tcpip(
        remote_host,
        remote_port,
        Some((&peer.ip().to_string(), peer.port())),
    );
    session.set_blocking(false);
    let channel = channel?;
    stream.set_nonblocking(true)?;

    debug!("Tunnel opened for {}", peer);
    Ok(Tunnel {
        peer,
        stream,
        channel,
        to_remote: Vec::new(),
        to_local: Vec::new(),
        local_eof: false,
        remote_eof: false,
    })
}

struct Tunnel {
    peer: SocketAddr,
    stream: TcpStream,
    channel: Channel,
    to_remote: Vec<u8>,
    to_local: Vec<u8>,
    local_eof: bool,
    remote_eof: bool,
}

impl Tunnel {
    /// Moves whatever data is ready in either direction. Returns whether any
    /// bytes moved.
    fn pump(&mut self, buffer: &mut [u8]) -> io::Result<bool> {
        let mut progress = false;

        if self.to_remote.is_empty() && !self.local_eof {
            match self.stream.read(buffer) {
                Ok(0) => self.local_eof = true,
                Ok(n) => {
                    self.to_remote.extend_from_slice(&buffer[..n]);
                    progress = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        progress |= flush(&mut self.channel, &mut self.to_remote)?;

        if self.to_local.is_empty() && !self.remote_eof {
            match self.channel.read(buffer) {
                Ok(0) => self.remote_eof = self.channel.eof(),
                Ok(n) => {
                    self.to_local.extend_from_slice(&buffer[..n]);
                    progress = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        progress |= flush(&mut self.stream, &mut self.to_local)?;

        Ok(progress)
    }

    fn finished(&self) -> bool {
        (self.remote_eof && self.to_local.is_empty())
            || (self.local_eof && self.to_remote.is_empty())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        let _ = self.channel.close();
    }
}

fn flush(writer: &mut dyn Write, pending: &mut Vec<u8>) -> io::Result<bool> {
    if pending.is_empty() {
        return Ok(false);
    }
    match writer.write(pending) {
        Ok(n) => {
            pending.drain(..n);
            Ok(n > 0)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}
