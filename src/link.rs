//! Raw IP channel between the two endpoints.
//!
//! Segments ride in IPv4 datagrams with protocol number 222. The socket is
//! bound to the local address (and optionally pinned to an interface), so
//! the kernel fills in the IP header on egress; on ingress the datagram
//! arrives with its IP header, which is parsed to apply the master filter:
//! only datagrams whose source is the configured peer and whose protocol is
//! 222 are surfaced. Everything else, including undecodable headers, is
//! dropped inside the wait.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use etherparse::Ipv4HeaderSlice;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::err::Error;
use crate::wire::{Segment, PROTOCOL};

pub struct Link {
    sock: Socket,
    peer: Ipv4Addr,
}

impl Link {
    /// Open the protocol-222 raw socket. Requires CAP_NET_RAW.
    pub fn open(local: Ipv4Addr, peer: Ipv4Addr, interface: Option<&str>) -> Result<Self, Error> {
        let sock = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(PROTOCOL as i32)))?;

        sock.bind(&SockAddr::from(SocketAddrV4::new(local, 0)))?;
        if let Some(dev) = interface {
            sock.bind_device(Some(dev.as_bytes()))?;
        }

        Ok(Link { sock, peer })
    }

    pub fn send(&self, seg: &Segment) -> Result<(), Error> {
        let addr = SockAddr::from(SocketAddrV4::new(self.peer, 0));
        self.sock.send_to(&seg.encode(), &addr)?;

        Ok(())
    }

    /// Wait for the next segment that passes the master filter.
    ///
    /// Returns `None` once `timeout` has elapsed; `timeout: None` waits
    /// indefinitely. Filtered-out datagrams do not reset the deadline.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Segment>, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = [0u8; 65535];

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).as_millis().max(1) as i32
                }
                None => -1,
            };

            let mut fds = [PollFd::new(self.sock.as_raw_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, wait) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }

            let n = nix::unistd::read(self.sock.as_raw_fd(), &mut buf)?;

            let Ok(ip4h) = Ipv4HeaderSlice::from_slice(&buf[..n]) else { continue };
            if ip4h.source_addr() != self.peer || ip4h.protocol() != PROTOCOL {
                continue;
            }

            match Segment::decode(&buf[(ip4h.ihl() * 4) as usize..n]) {
                Ok(seg) => return Ok(Some(seg)),
                Err(err) => {
                    debug!(%err, "dropping malformed datagram");
                    continue;
                }
            }
        }
    }
}
