//! Publisher: encode a typed value and hand it to the broker.

use serde::Serialize;
use tracing::debug;

use super::codec::Codec;
use crate::broker::{Channel, Envelope};
use crate::error::PublishError;

/// Encode `value` with `codec` and publish it to `exchange` on `routing_key`.
///
/// Blocks until the broker has accepted the envelope for routing; it does
/// not wait for any consumer. An encoding failure is returned as
/// [`PublishError::Encode`] and nothing is sent.
pub fn publish<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: Codec,
) -> Result<(), PublishError>
where
    Ch: Channel + ?Sized,
    T: Serialize + ?Sized,
{
    let body = codec.encode(value)?;
    let size = body.len();
    channel.basic_publish(exchange, routing_key, Envelope::new(codec.content_type(), body))?;
    debug!(exchange, routing_key, content_type = codec.content_type(), size, "published");
    Ok(())
}

/// [`publish`] with the JSON codec.
pub fn publish_json<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    Ch: Channel + ?Sized,
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, Codec::Json)
}

/// [`publish`] with the bitcode codec.
pub fn publish_bitcode<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PublishError>
where
    Ch: Channel + ?Sized,
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, Codec::Bitcode)
}
