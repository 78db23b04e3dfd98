//! Server side of the challenge/response handshake.
//!
//! Runs entirely inside one pre-acquired scratch buffer; the only
//! allocations on the success path are TLS and signature internals. The
//! caller wraps the whole exchange in the configured auth deadline and
//! reads the peer id out of the buffer afterwards.

use crate::error::GorosError;
use crate::pool::AuthBuffer;
use crate::tls;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use goro_common::crypto::{build_signed_data_to, unix_now};
use goro_common::frame::AuthResult;
use goro_common::types::{
    auth_status, frame_type, CHALLENGE_SIZE, SERVER_ID_SIZE, TIMESTAMP_SIZE,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tracing::{debug, warn};

/// Fixed tolerance for challenge timestamps ahead of the server clock.
const FUTURE_TOLERANCE_SECS: u64 = 60;

const CHALLENGE_FRAME_LEN: usize = 1 + CHALLENGE_SIZE + TIMESTAMP_SIZE + SERVER_ID_SIZE;

/// Authenticates one accepted TLS connection.
///
/// On success the client's public key remains in the buffer's key region
/// for the caller to consume. Any failure aborts the connection; failures
/// detected after signature material arrived send a best-effort
/// [`AuthResult`] with the matching status first.
///
/// # Errors
///
/// Returns [`GorosError`] describing the first failed step.
pub async fn authenticate<IO>(
    stream: &mut TlsStream<IO>,
    challenge_ttl: Duration,
    buf: &mut AuthBuffer,
) -> Result<(), GorosError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    // 1. Client hello: tag + public key.
    stream.read_exact(buf.work_mut(1)).await?;
    let tag = buf.work_mut(1)[0];
    if tag != frame_type::CLIENT_HELLO {
        warn!(got = tag, "auth: unexpected message type");
        return Err(goro_common::ProtoError::UnexpectedType(tag).into());
    }
    stream.read_exact(buf.pub_key_mut()).await?;
    debug!("auth: received client hello");

    // 2. Fresh challenge and timestamp, straight into their regions.
    OsRng.fill_bytes(buf.challenge_mut());
    let timestamp = unix_now()?;
    buf.set_timestamp(timestamp);

    // 3. Emit the challenge frame in a single write.
    let challenge = buf.challenge();
    let server_id = buf.server_id();
    {
        let work = buf.work_mut(CHALLENGE_FRAME_LEN);
        work[0] = frame_type::SERVER_CHALLENGE;
        work[1..1 + CHALLENGE_SIZE].copy_from_slice(&challenge);
        work[1 + CHALLENGE_SIZE..1 + CHALLENGE_SIZE + TIMESTAMP_SIZE]
            .copy_from_slice(&timestamp.to_be_bytes());
        work[1 + CHALLENGE_SIZE + TIMESTAMP_SIZE..].copy_from_slice(&server_id);
    }
    stream.write_all(buf.work_mut(CHALLENGE_FRAME_LEN)).await?;
    stream.flush().await?;
    debug!("auth: challenge sent");

    // 4. Client response: tag + signature.
    stream.read_exact(buf.work_mut(1)).await?;
    let tag = buf.work_mut(1)[0];
    if tag != frame_type::CLIENT_RESPONSE {
        warn!(got = tag, "auth: unexpected message type");
        return Err(goro_common::ProtoError::UnexpectedType(tag).into());
    }
    stream.read_exact(buf.signature_mut()).await?;
    debug!("auth: received client response");

    // 5. Channel binding from the established TLS session.
    let (_, conn) = stream.get_ref();
    let channel_binding = tls::channel_binding(conn)?;

    // 6. Verify the signature over the reconstructed signing input.
    let pub_key = buf.pub_key();
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pub_key) else {
        warn!("auth: public key is not a valid curve point");
        send_result(stream, auth_status::INVALID_SIG, "invalid signature").await;
        return Err(GorosError::InvalidSignature);
    };
    build_signed_data_to(
        buf.signed_data_mut(),
        &challenge,
        timestamp,
        &server_id,
        &pub_key,
        &channel_binding,
    );
    let signature = Signature::from_bytes(&buf.signature());
    if verifying_key.verify(buf.signed_data(), &signature).is_err() {
        warn!("auth: invalid signature");
        send_result(stream, auth_status::INVALID_SIG, "invalid signature").await;
        return Err(GorosError::InvalidSignature);
    }
    debug!("auth: signature valid");

    // 7. Replay window.
    let now = unix_now()?;
    if let Err(e) = check_timestamp(timestamp, now, challenge_ttl) {
        match &e {
            GorosError::TimestampInFuture { ahead_secs } => {
                warn!(ahead_secs, "auth: timestamp in future");
                send_result(stream, auth_status::REPLAY, "timestamp in future").await;
            }
            GorosError::ChallengeExpired { age_secs } => {
                warn!(age_secs, "auth: challenge expired");
                send_result(stream, auth_status::REPLAY, "challenge expired").await;
            }
            _ => {}
        }
        return Err(e);
    }

    // 8. Success result: tag + status, one write.
    {
        let work = buf.work_mut(2);
        work[0] = frame_type::AUTH_RESULT;
        work[1] = auth_status::OK;
    }
    stream.write_all(buf.work_mut(2)).await?;
    stream.flush().await?;
    debug!("auth: result sent");

    Ok(())
}

/// Validates the challenge timestamp against the replay window.
fn check_timestamp(timestamp: u64, now: u64, challenge_ttl: Duration) -> Result<(), GorosError> {
    if timestamp > now + FUTURE_TOLERANCE_SECS {
        return Err(GorosError::TimestampInFuture {
            ahead_secs: timestamp - now,
        });
    }
    let age = now.saturating_sub(timestamp);
    if age > challenge_ttl.as_secs() {
        return Err(GorosError::ChallengeExpired { age_secs: age });
    }
    Ok(())
}

/// Best-effort failure notification; the connection is closing either way.
async fn send_result<IO>(stream: &mut TlsStream<IO>, status: u8, msg: &str)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let frame = AuthResult::failure(status, msg).encode();
    if stream.write_all(&frame).await.is_ok() {
        let _ = stream.flush().await;
    }
}
