use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use tokio::net::UdpSocket;

#[derive(Debug)]
pub struct Socket {
    socket: UdpSocket,
}

impl Socket {
    pub fn bind<A>(addr: A) -> io::Result<Self>
    where
        A: ToSocketAddrs,
    {
        let socket = std::net::UdpSocket::bind(addr)?;

        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: UdpSocket::from_std(socket)?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let len = self.socket.send_to(buf, target).await?;
        tracing::trace!("write {} bytes to {}", len, target);
        Ok(len)
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        tracing::trace!("read {} bytes from {}", len, addr);
        Ok((len, addr))
    }
}

#[cfg(unix)]
impl AsRawFd for Socket {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Resolves a `host:port` connect target to a socket address.
///
/// Fails without creating any connection state; the caller decides
/// whether an unresolvable peer is fatal.
pub fn resolve(target: &str) -> io::Result<SocketAddr> {
    target.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address found for {:?}", target),
        )
    })
}
