use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata;
use hickory_proto::rr::{RData, Record};
use hickory_proto::serialize::binary::BinDecodable;
use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::engine::Resolver;
use crate::errors::{FrontEndError, ResolveError};

/// Max size for the UDP receive buffer, per RFC6891 §6.2.5 (spec §4.3), mirroring the
/// teacher's `backend::MAX_RECEIVE_BUFFER_SIZE`.
const MAX_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Synthetic TTL stamped on outgoing A answers. The engine only returns an IP, not the
/// upstream record's TTL, so there is nothing truthful to forward here.
const ANSWER_TTL: u32 = 60;

/// Runs the UDP/53 front-end forever (spec §4.3, §5). A single task reads datagrams; each
/// datagram is handed to an independently spawned handler so slow resolutions never block
/// the receive loop, mirroring the teacher's `daemon::daemon`.
pub async fn serve(resolver: Resolver, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let socket = bind_listen_socket(bind_addr)?;
    let socket = Arc::new(socket);
    let resolver = Arc::new(resolver);

    let mut buf = [0u8; MAX_RECEIVE_BUFFER_SIZE];
    loop {
        let (request, peer) = match read_datagram(socket.deref(), &mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "dropping unreadable datagram");
                continue;
            }
        };
        tokio::spawn(handle(socket.clone(), request, peer, resolver.clone()));
    }
}

async fn read_datagram(socket: &UdpSocket, buf: &mut [u8]) -> anyhow::Result<(Message, SocketAddr)> {
    let (len, peer) = socket.recv_from(buf).await?;
    let request = Message::from_bytes(&buf[..len])?;
    Ok((request, peer))
}

async fn handle(socket: Arc<UdpSocket>, request: Message, peer: SocketAddr, resolver: Arc<Resolver>) {
    match build_response(&request, resolver.as_ref()).await {
        Ok(response) => match response.to_vec() {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, peer).await {
                    error!(%peer, error = %e, "failed to send response datagram");
                }
            }
            Err(e) => error!(%peer, error = %e, "failed to encode response"),
        },
        // spec §7: Overrun, transport errors, and unsupported question types are fatal for
        // the whole datagram — logged and dropped, no response sent.
        Err(e) => error!(%peer, error = %e, "datagram handling failed"),
    }
}

/// Builds the response message for one request, per spec §4.3: each question is resolved
/// in turn; a `ResolveFailed` downgrades that question to REFUSED and the loop continues,
/// but any other error (Overrun, transport, unsupported type) aborts the whole datagram.
async fn build_response(request: &Message, resolver: &Resolver) -> Result<Message, FrontEndError> {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_response_code(ResponseCode::NoError);

    for query in request.queries() {
        if query.query_type() != hickory_proto::rr::RecordType::A {
            return Err(FrontEndError::UnsupportedQuestionType(format!("{:?}", query.query_type())));
        }

        response.add_query(query.clone());
        match resolver.resolve(&query.name().to_string()).await {
            Ok(IpAddr::V4(ip)) => {
                debug!(name = %query.name(), %ip, "question resolved");
                response.add_answer(Record::from_rdata(query.name().clone(), ANSWER_TTL, RData::A(rdata::A(ip))));
            }
            Ok(IpAddr::V6(_)) => unreachable!("the engine only ever answers with A records"),
            Err(ResolveError::ResolveFailed(name, reason)) => {
                debug!(%name, %reason, "question refused");
                response.set_response_code(ResponseCode::Refused);
            }
            Err(e @ (ResolveError::Overrun(..) | ResolveError::Transport(_))) => {
                return Err(FrontEndError::Resolve(e));
            }
        }
    }

    Ok(response)
}

/// Binds the listening socket. On Windows this goes through a `std::net::UdpSocket` first
/// so `SIO_UDP_CONNRESET` can be disabled on the exact socket that will receive datagrams,
/// then hands it to tokio — a UDP socket that gets an ICMP port-unreachable for a prior
/// send is otherwise torn down by Winsock (spec §4.3).
#[cfg(windows)]
fn bind_listen_socket(bind_addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    use std::os::windows::io::AsRawSocket;
    use windows_sys::Win32::Networking::WinSock::{WSAIoctl, SOCKET};

    const SIO_UDP_CONNRESET: u32 = 0x9800000C;

    let std_socket = std::net::UdpSocket::bind(bind_addr)?;
    std_socket.set_nonblocking(true)?;

    let handle = std_socket.as_raw_socket() as SOCKET;
    let mut enable: u32 = 0;
    let mut bytes_returned: u32 = 0;
    let result = unsafe {
        WSAIoctl(
            handle,
            SIO_UDP_CONNRESET,
            &mut enable as *mut _ as *mut std::ffi::c_void,
            std::mem::size_of::<u32>() as u32,
            std::ptr::null_mut(),
            0,
            &mut bytes_returned,
            std::ptr::null_mut(),
            None,
        )
    };
    if result != 0 {
        return Err(anyhow::anyhow!("WSAIoctl(SIO_UDP_CONNRESET) failed: {}", std::io::Error::last_os_error()));
    }

    Ok(UdpSocket::from_std(std_socket)?)
}

#[cfg(not(windows))]
fn bind_listen_socket(bind_addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let std_socket = std::net::UdpSocket::bind(bind_addr)?;
    std_socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(std_socket)?)
}
