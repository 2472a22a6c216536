use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::BinDecodable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{instrument, trace};

use crate::cache::{canonical_question_string, CacheKey, ResponseCache};
use crate::errors::TransportError;

const DNS_PORT: u16 = 53;
const SEND_DEADLINE: Duration = Duration::from_secs(10);

/// Builds a DNS request asking `authority` about `name`'s records of type `record_type`.
/// Header fields beyond the question are the wire codec's defaults (spec §6).
pub fn make_request(name: &Name, record_type: RecordType) -> Message {
    let mut query = Query::new();
    query.set_name(name.clone()).set_query_type(record_type);
    let mut message = Message::new();
    message.add_query(query);
    message.set_id(rand::random());
    message
}

/// Sends one serialized request to a given authoritative IP and returns the parsed response
/// (spec §4.2). Implementations own the process-wide response cache.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: &Message, authority: IpAddr) -> Result<Message, TransportError>;
}

/// DNS-over-TCP/53 transport with a single 10-second deadline covering connect, write,
/// flush, and both reads, and a process-wide, append-only response cache keyed by
/// (question text, authority IP) (spec §4.2). No retries: any I/O, parse, or timeout error
/// propagates to the caller.
#[derive(Debug)]
pub struct TcpTransport {
    cache: ResponseCache,
}

impl TcpTransport {
    pub fn new() -> Self {
        TcpTransport { cache: ResponseCache::new() }
    }

    async fn send_over_wire(
        &self,
        request: &Message,
        authority: IpAddr,
    ) -> Result<Message, TransportError> {
        let bytes = request.to_vec().map_err(|source| TransportError::Protocol { addr: authority, source })?;

        let mut stream = TcpStream::connect((authority, DNS_PORT))
            .await
            .map_err(|source| TransportError::Io { addr: authority, source })?;

        let len = bytes.len() as u16;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|source| TransportError::Io { addr: authority, source })?;
        stream.write_all(&bytes).await.map_err(|source| TransportError::Io { addr: authority, source })?;
        stream.flush().await.map_err(|source| TransportError::Io { addr: authority, source })?;

        let mut len_buf = [0u8; 2];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|source| TransportError::Io { addr: authority, source })?;
        let response_len = u16::from_be_bytes(len_buf) as usize;

        let mut response_buf = vec![0u8; response_len];
        stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|source| TransportError::Io { addr: authority, source })?;

        let response = Message::from_bytes(&response_buf)
            .map_err(|source| TransportError::Protocol { addr: authority, source })?;
        trace!(%authority, bytes = response_len, "received response");
        Ok(response)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self, request))]
    async fn send(&self, request: &Message, authority: IpAddr) -> Result<Message, TransportError> {
        let key: CacheKey = (canonical_question_string(request), authority);
        if let Some(cached) = self.cache.get(&key) {
            trace!(%authority, question = %key.0, "response cache hit");
            return Ok(cached);
        }

        let response = timeout(SEND_DEADLINE, self.send_over_wire(request, authority))
            .await
            .map_err(|_| TransportError::Timeout(authority))??;

        self.cache.insert(key, response.clone());
        Ok(response)
    }
}
