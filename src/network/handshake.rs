// src/network/handshake.rs
use anyhow::{anyhow, bail, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::message::{Envelope, Message};
use crate::registry::NodeId;

/// Largest frame accepted from a peer (a full chain response fits comfortably).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub async fn send_envelope<S>(framed: &mut Framed<S, LengthDelimitedCodec>, env: &Envelope) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(env.encode()?).await?;
    Ok(())
}

pub async fn read_envelope<S>(framed: &mut Framed<S, LengthDelimitedCodec>) -> Result<Envelope>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = framed
        .next()
        .await
        .ok_or_else(|| anyhow!("peer closed during handshake"))??;
    Ok(Envelope::decode(&frame)?)
}

/// Dialer side: send HANDSHAKE, wait for HANDSHAKE_ACK. Returns the peer's id.
pub async fn client_handshake<S>(
    stream: S,
    my_node_id: &str,
) -> Result<(NodeId, Framed<S, LengthDelimitedCodec>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, codec());
    let hello = Envelope::new(
        my_node_id,
        Message::Handshake {
            node_id: my_node_id.to_string(),
        },
    );
    send_envelope(&mut framed, &hello).await?;

    let reply = read_envelope(&mut framed).await?;
    let peer_id = match reply.message {
        Message::HandshakeAck { node_id } => node_id,
        other => bail!("expected HANDSHAKE_ACK, got {}", other.kind()),
    };
    check_peer_id(&peer_id, my_node_id)?;
    Ok((peer_id, framed))
}

/// Listener side: wait for HANDSHAKE, answer with HANDSHAKE_ACK. Returns the peer's id.
pub async fn server_handshake<S>(
    stream: S,
    my_node_id: &str,
) -> Result<(NodeId, Framed<S, LengthDelimitedCodec>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, codec());
    let hello = read_envelope(&mut framed).await?;
    let peer_id = match hello.message {
        Message::Handshake { node_id } => node_id,
        other => bail!("expected HANDSHAKE, got {}", other.kind()),
    };
    check_peer_id(&peer_id, my_node_id)?;

    let ack = Envelope::new(
        my_node_id,
        Message::HandshakeAck {
            node_id: my_node_id.to_string(),
        },
    );
    send_envelope(&mut framed, &ack).await?;
    Ok((peer_id, framed))
}

fn check_peer_id(peer_id: &str, my_node_id: &str) -> Result<()> {
    if peer_id.is_empty() {
        bail!("peer sent an empty node id");
    }
    if peer_id == my_node_id {
        bail!("refusing connection to self ({})", peer_id);
    }
    Ok(())
}
