/*!
 * Message Channel
 *
 * The host's bidirectional text channel. Two message families share it:
 *
 * - `S<stream><bytes>`: console traffic. Inbound messages feed the port
 *   inbox; port writes leave as the same shape.
 * - `X5<cmd><id>:<payload>`: proxied store queries, see [`remote`].
 */

pub mod remote;

pub use remote::{ProxyCommand, RemoteQueries};

use bytes::{BufMut, Bytes, BytesMut};
use miette::Diagnostic;
use thiserror::Error;

/// Leading byte of console messages
pub const PORT_TAG: u8 = b'S';

/// Errors posting to the host
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ChannelError {
    #[error("Message channel closed")]
    #[diagnostic(
        code(channel::closed),
        help("The host side of the channel went away.")
    )]
    Closed,
}

/// Outbound half of the host channel
pub trait MessageChannel: Send + Sync {
    fn post(&self, message: Bytes) -> Result<(), ChannelError>;
}

impl MessageChannel for flume::Sender<Bytes> {
    fn post(&self, message: Bytes) -> Result<(), ChannelError> {
        self.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// Frame console bytes for `stream`
pub fn port_message(stream: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + data.len());
    buf.put_u8(PORT_TAG);
    buf.put_u8(b'0' + stream);
    buf.put_slice(data);
    buf.freeze()
}

/// Split a console message into its stream digit and payload
pub fn parse_port_message(message: &[u8]) -> Option<(u8, &[u8])> {
    match message {
        [PORT_TAG, digit, payload @ ..] if digit.is_ascii_digit() => {
            Some((digit - b'0', payload))
        }
        _ => None,
    }
}
