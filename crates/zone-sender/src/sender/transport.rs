//! Framed connection to the queue server.
//!
//! Every message is one JSON document behind a 4-byte big-endian length
//! prefix ([`LengthDelimitedCodec`]). The connection is split into an inbound
//! stream of decoded [`Response`]s and an outbound writer fed from an
//! unbounded outbox, so nothing that sends ever waits on the socket.

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use zone_sender_core::{Error, Response};

/// Opens the TCP connection to the queue server.
pub async fn connect(addr: &str) -> Result<TcpStream, Error> {
    let stream = TcpStream::connect(addr).await.map_err(|source| Error::Connect {
        addr: addr.to_owned(),
        source,
    })?;
    if let Err(_e) = stream.set_nodelay(true) {
        tracing::debug!("Could not disable Nagle: {_e}");
    }
    Ok(stream)
}

/// Splits `io` into a frame sink and a stream of decoded responses.
///
/// The stream yields [`Error::Codec`] for a frame that is not a valid
/// response, [`Error::Transport`] for an I/O failure, and ends when the peer
/// closes the connection.
pub fn split<T>(
    io: T,
) -> (
    impl Sink<Bytes, Error = std::io::Error> + Unpin,
    impl Stream<Item = Result<Response, Error>> + Unpin,
)
where
    T: AsyncRead + AsyncWrite,
{
    let (sink, stream) = Framed::new(io, LengthDelimitedCodec::new()).split();
    let inbound = stream.map(|frame| match frame {
        Ok(bytes) => serde_json::from_slice::<Response>(&bytes).map_err(Error::from),
        Err(e) => Err(Error::Transport(e)),
    });
    (sink, inbound)
}

/// Writes every frame queued on `outbox` until it closes or the sink fails.
pub async fn pump_outbox<S>(
    mut outbox: mpsc::UnboundedReceiver<Value>,
    mut sink: S,
) -> Result<(), Error>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    while let Some(frame) = outbox.recv().await {
        let bytes = serde_json::to_vec(&frame)?;
        sink.send(Bytes::from(bytes)).await?;
    }
    sink.close().await?;
    Ok(())
}
