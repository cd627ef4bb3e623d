//! The exclusive-access unit shared by foreground calls and the heartbeat.
//!
//! A [`Link`] owns the transport together with the session state. It lives
//! behind one `tokio::sync::Mutex`; holding the guard for the whole of
//! [`Link::exchange`] is what keeps a request and its reply contiguous on the
//! wire.

use tracing::{debug, error, warn};

use crate::{
    error::{BikeError, Result},
    protocol::{decode_lut, decode_result_code, decode_velocity, Command, Reply, ReplyKind},
    transport::Transport,
    types::SessionState,
    STRING_SENTINEL,
};

pub(crate) struct Link {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
}

impl Link {
    pub(crate) fn new(transport: Option<Box<dyn Transport>>) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
        }
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        debug!("Session state {} -> {}", self.state, state);
        self.state = state;
    }

    pub(crate) const fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub(crate) fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Fail unless foreground commands are currently accepted
    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Closed | SessionState::EmergencyStopped => Err(BikeError::SessionClosed),
            state => Err(BikeError::InvalidState { state }),
        }
    }

    /// Send one request and read its complete reply
    ///
    /// A fatal error closes the transport and moves the session to
    /// [`SessionState::Closed`] before it is returned.
    pub(crate) async fn exchange(&mut self, command: &Command) -> Result<Reply> {
        match self.exchange_inner(command).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_fatal() {
                    error!("{:?} exchange failed, closing link: {}", command.opcode(), e);
                    self.set_state(SessionState::Closed);
                    self.release().await;
                }
                Err(e)
            }
        }
    }

    async fn exchange_inner(&mut self, command: &Command) -> Result<Reply> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(BikeError::SessionClosed)?;

        let frame = command.encode();
        debug!("Sending {:?}: {:02X?}", command.opcode(), &frame[..]);
        transport.write_all(&frame).await?;

        let kind = command.reply_kind();
        let reply = match kind.fixed_len() {
            Some(len) => {
                let data = transport.read_exact(len).await?;
                if kind == ReplyKind::Float {
                    Reply::Velocity(decode_velocity(&data)?)
                } else {
                    Reply::Result(decode_result_code(&data)?)
                }
            }
            None if kind == ReplyKind::Text => {
                let data = transport.read_until(STRING_SENTINEL).await?;
                Reply::Text(decode_lut(&data)?)
            }
            None => Reply::Nothing,
        };

        debug!("Received {:?} reply: {:?}", command.opcode(), reply);
        Ok(reply)
    }

    /// Close and drop the transport; safe to call more than once
    pub(crate) async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error while closing transport: {}", e);
            }
        }
    }
}
