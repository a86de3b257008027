use super::{CommandChannel, Outgoing};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use zone_sender_core::{Error, Response};

/// Drives a [`CommandChannel`] until the connection's inbound side ends.
///
/// This task is the sole owner of the channel state: outbound requests from
/// workers and inbound responses from the connection are interleaved here, so
/// the pending map is never shared.
///
/// # Behavior
///
/// - Each [`Outgoing`] request is tagged and written via
///   [`CommandChannel::send`].
/// - Each decoded [`Response`] is routed via [`CommandChannel::on_inbound`].
/// - A frame that is not valid JSON is logged and skipped.
/// - Returns `Ok(())` when the inbound stream ends (the connection closed) and
///   `Err` on a transport failure. Requests still pending at that point are
///   left unresolved.
pub async fn run_dispatcher<S>(
    mut channel: CommandChannel,
    mut requests: mpsc::UnboundedReceiver<Outgoing>,
    mut inbound: S,
) -> Result<(), Error>
where
    S: Stream<Item = Result<Response, Error>> + Unpin,
{
    loop {
        tokio::select! {
            Some(Outgoing { command, completion }) = requests.recv() => {
                channel.send(command, completion);
            }
            message = inbound.next() => match message {
                Some(Ok(message)) => {
                    channel.on_inbound(message);
                }
                Some(Err(Error::Codec(e))) => {
                    tracing::warn!("Skipping malformed frame: {e}");
                }
                Some(Err(e)) => {
                    tracing::debug!(pending = channel.pending(), "Inbound stream failed: {e}");
                    return Err(e);
                }
                None => {
                    tracing::debug!(pending = channel.pending(), "Inbound stream ended");
                    return Ok(());
                }
            },
        }
    }
}
