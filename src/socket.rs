use std::io;
use std::net;
use std::time;

const SOCKET_POLLING_KEY: usize = 0;

/// Largest datagram either side will send or accept (1500 MTU - 20 IP - 8 UDP).
pub const FRAME_SIZE_MAX: usize = 1472;

/// Outbound half of a datagram transport. One call sends exactly one datagram.
pub trait DatagramTx {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Marks the most recently received datagram as valid. Transports which reply to whoever
    /// spoke last only switch to its source once this is called.
    fn accept_source(&mut self) {}
}

/// Inbound half of a datagram transport.
pub trait DatagramRx {
    /// Blocks for a duration of up to `timeout` (forever if `None`) for an incoming datagram and
    /// copies it into `buffer`, returning its length. Returns Ok(None) if nothing arrived in the
    /// alloted time. Datagrams longer than `buffer` are truncated.
    fn wait_for_datagram(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<usize>>;
}

// Refused means an ICMP port-unreachable came back for an earlier datagram: the peer is not (or no
// longer) listening. For an unreliable transport that is indistinguishable from loss.
fn is_loss(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
}

struct Inbound {
    poller: polling::Poller,
    poller_events: polling::Events,
}

impl Inbound {
    fn new(socket: &net::UdpSocket) -> io::Result<Self> {
        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        Ok(Self {
            poller,
            poller_events: polling::Events::new(),
        })
    }

    /// Reads a datagram if one is ready, returning its length and source address.
    fn try_read(
        socket: &net::UdpSocket,
        buffer: &mut [u8],
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        match socket.recv_from(buffer) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no datagram
                io::ErrorKind::WouldBlock => Ok(None),
                _ if is_loss(&err) => {
                    log::trace!("receive: {}", err);
                    Ok(None)
                }
                _ => Err(err),
            },
        }
    }

    fn wait(
        &mut self,
        socket: &net::UdpSocket,
        buffer: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(usize, net::SocketAddr)>> {
        // Something may already be queued; polling is only needed if not
        if let Some(read) = Self::try_read(socket, buffer)? {
            return Ok(Some(read));
        }

        // Re-arm the readable event (must be done prior to each wait() call)
        self.poller
            .modify(socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            // The socket is readable - read in confidence
            Self::try_read(socket, buffer)
        } else {
            Ok(None)
        }
    }

    fn deregister(&self, socket: &net::UdpSocket) {
        // Registered sources must be removed before they are closed
        if let Err(err) = self.poller.delete(socket) {
            log::trace!("poller delete: {}", err);
        }
    }
}

/// Socket bound to an ephemeral port and connected to a single peer. Used by the sender.
pub struct ConnectedSocket {
    socket: net::UdpSocket,
    inbound: Inbound,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    peer_addr: net::SocketAddr,
}

impl ConnectedSocket {
    pub fn connect<A>(peer_address: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let peer_addr = peer_address.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to")
        })?;

        let bind_address: net::SocketAddr = if peer_addr.is_ipv4() {
            (net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = net::UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;
        socket.connect(peer_addr)?;

        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;

        let inbound = Inbound::new(&socket)?;

        Ok(Self {
            socket,
            inbound,
            local_addr,
            peer_addr,
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }
}

impl Drop for ConnectedSocket {
    fn drop(&mut self) {
        self.inbound.deregister(&self.socket);
    }
}

impl DatagramTx for ConnectedSocket {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        match self.socket.send(datagram) {
            Ok(_) => Ok(()),
            Err(err) if is_loss(&err) => {
                log::trace!("send: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl DatagramRx for ConnectedSocket {
    fn wait_for_datagram(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<usize>> {
        Ok(self
            .inbound
            .wait(&self.socket, buffer, timeout)?
            .map(|(len, _)| len))
    }
}

/// Socket bound to a well-known port, replying to the source of the most recent accepted
/// datagram. Used by the receiver.
pub struct ListeningSocket {
    socket: net::UdpSocket,
    inbound: Inbound,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Source of the most recent datagram, valid or not
    last_source: Option<net::SocketAddr>,
    // Source of the most recent accepted datagram; replies go here
    peer_addr: Option<net::SocketAddr>,
}

impl ListeningSocket {
    pub fn bind<A>(bind_address: A) -> io::Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = net::UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let inbound = Inbound::new(&socket)?;

        Ok(Self {
            socket,
            inbound,
            local_addr,
            last_source: None,
            peer_addr: None,
        })
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<net::SocketAddr> {
        self.peer_addr
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        self.inbound.deregister(&self.socket);
    }
}

impl DatagramTx for ListeningSocket {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let Some(peer_addr) = self.peer_addr else {
            // Nobody to reply to yet
            return Ok(());
        };

        match self.socket.send_to(datagram, peer_addr) {
            Ok(_) => Ok(()),
            Err(err) if is_loss(&err) => {
                log::trace!("send to {}: {}", peer_addr, err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn accept_source(&mut self) {
        if self.last_source != self.peer_addr {
            log::debug!("replying to {:?}", self.last_source);
            self.peer_addr = self.last_source;
        }
    }
}

impl DatagramRx for ListeningSocket {
    fn wait_for_datagram(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<usize>> {
        match self.inbound.wait(&self.socket, buffer, timeout)? {
            Some((len, addr)) => {
                self.last_source = Some(addr);
                Ok(Some(len))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_over_loopback() {
        let mut listener = ListeningSocket::bind(("127.0.0.1", 0)).unwrap();
        let mut connected = ConnectedSocket::connect(listener.local_addr()).unwrap();

        assert_eq!(connected.peer_addr(), listener.local_addr());
        assert_eq!(listener.peer_addr(), None);

        // Replies are dropped until someone has spoken
        listener.send(&[0xFF]).unwrap();

        connected.send(&[1, 2, 3]).unwrap();

        let mut buffer = [0; FRAME_SIZE_MAX];
        let timeout = Some(time::Duration::from_millis(1000));

        let len = listener.wait_for_datagram(&mut buffer, timeout).unwrap();
        assert_eq!(len, Some(3));
        assert_eq!(&buffer[..3], &[1, 2, 3]);
        assert_eq!(listener.peer_addr(), None);

        listener.accept_source();
        assert_eq!(
            listener.peer_addr().map(|addr| addr.port()),
            Some(connected.local_addr().port())
        );

        listener.send(&[4, 5]).unwrap();

        let len = connected.wait_for_datagram(&mut buffer, timeout).unwrap();
        assert_eq!(len, Some(2));
        assert_eq!(&buffer[..2], &[4, 5]);
    }

    #[test]
    fn unaccepted_source_does_not_redirect_replies() {
        let mut listener = ListeningSocket::bind(("127.0.0.1", 0)).unwrap();
        let mut peer = ConnectedSocket::connect(listener.local_addr()).unwrap();
        let mut stray = ConnectedSocket::connect(listener.local_addr()).unwrap();

        let mut buffer = [0; FRAME_SIZE_MAX];
        let timeout = Some(time::Duration::from_millis(1000));

        peer.send(&[1]).unwrap();
        assert_eq!(listener.wait_for_datagram(&mut buffer, timeout).unwrap(), Some(1));
        listener.accept_source();

        // Received but never accepted
        stray.send(&[0xEE]).unwrap();
        assert_eq!(listener.wait_for_datagram(&mut buffer, timeout).unwrap(), Some(1));
        assert_eq!(buffer[0], 0xEE);

        listener.send(&[2]).unwrap();

        assert_eq!(peer.wait_for_datagram(&mut buffer, timeout).unwrap(), Some(1));
        assert_eq!(buffer[0], 2);

        let short_timeout = Some(time::Duration::from_millis(50));
        assert_eq!(stray.wait_for_datagram(&mut buffer, short_timeout).unwrap(), None);
    }

    #[test]
    fn wait_times_out() {
        let mut listener = ListeningSocket::bind(("127.0.0.1", 0)).unwrap();
        let mut buffer = [0; FRAME_SIZE_MAX];

        let begin = time::Instant::now();
        let result = listener
            .wait_for_datagram(&mut buffer, Some(time::Duration::from_millis(50)))
            .unwrap();

        assert_eq!(result, None);
        assert!(begin.elapsed() >= time::Duration::from_millis(40));
    }
}
