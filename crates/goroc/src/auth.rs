//! Client side of the challenge/response handshake.

use crate::error::GorocError;
use goro_common::crypto::sign_challenge;
use goro_common::frame::{ClientHello, ClientResponse, ServerChallenge};
use goro_common::types::{
    auth_status, frame_type, CHANNEL_BINDING_LABEL, CHANNEL_BINDING_SIZE, MAX_ERROR_MSG_LEN,
};
use goro_common::KeyPair;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Runs the client half of the handshake on a fresh TLS connection.
///
/// # Errors
///
/// Returns [`GorocError::AuthFailed`] when the server answers with a
/// non-OK status, or another [`GorocError`] on transport or codec
/// failures.
pub(crate) async fn authenticate<IO>(
    stream: &mut TlsStream<IO>,
    keys: &KeyPair,
) -> Result<(), GorocError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let hello = ClientHello {
        pub_key: keys.public_key_bytes(),
    };
    stream.write_all(&hello.encode()).await?;
    stream.flush().await?;
    debug!("auth: hello sent");

    let mut challenge_buf = [0u8; ServerChallenge::ENCODED_LEN];
    stream.read_exact(&mut challenge_buf).await?;
    let challenge = ServerChallenge::decode(&challenge_buf)?;
    debug!("auth: challenge received");

    let (_, conn) = stream.get_ref();
    let binding = channel_binding(conn)?;
    let signature = sign_challenge(
        keys.signing_key(),
        &challenge.challenge,
        challenge.timestamp,
        &challenge.server_id,
        &binding,
    );
    stream
        .write_all(&ClientResponse { signature }.encode())
        .await?;
    stream.flush().await?;
    debug!("auth: response sent");

    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != frame_type::AUTH_RESULT {
        return Err(goro_common::ProtoError::UnexpectedType(head[0]).into());
    }
    let status = head[1];
    if status == auth_status::OK {
        debug!("auth: accepted");
        return Ok(());
    }

    // Failure results carry a length-prefixed reason.
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_ERROR_MSG_LEN {
        return Err(goro_common::ProtoError::FrameTooLarge {
            max: MAX_ERROR_MSG_LEN,
            actual: len,
        }
        .into());
    }
    let mut msg = vec![0u8; len];
    stream.read_exact(&mut msg).await?;
    Err(GorocError::AuthFailed {
        status,
        message: String::from_utf8_lossy(&msg).into_owned(),
    })
}

/// Exports the RFC 5705 channel-binding value from the client side of the
/// TLS session. Must match the server's export byte for byte.
pub(crate) fn channel_binding(
    conn: &rustls::ClientConnection,
) -> Result<[u8; CHANNEL_BINDING_SIZE], GorocError> {
    if conn.is_handshaking() {
        return Err(GorocError::HandshakeIncomplete);
    }
    let binding =
        conn.export_keying_material([0u8; CHANNEL_BINDING_SIZE], CHANNEL_BINDING_LABEL, None)?;
    Ok(binding)
}
