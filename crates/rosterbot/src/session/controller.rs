//! Session lifecycle and event dispatch.

use tracing::{info, warn};

use super::client::{ChatClient, SessionHandle};
use super::error::{SessionError, SessionResult};
use super::{SessionEvent, SessionEventHandler};
use crate::config::{ChatConfig, Credentials};

/// Drives one chat session: login, then dispatch of inbound events.
///
/// Handlers are awaited one at a time, so no two events are processed
/// concurrently.
pub struct SessionController {
    client: ChatClient,
}

impl SessionController {
    /// Connect to the bridge configured in `config`.
    pub async fn connect(config: &ChatConfig) -> SessionResult<Self> {
        info!("Connecting to chat bridge at {}", config.endpoint);
        let client = ChatClient::connect(&config.endpoint).await?;
        Ok(Self { client })
    }

    /// Handle for outbound actions.
    pub fn handle(&self) -> SessionHandle {
        self.client.handle()
    }

    /// Send the login frame. The outcome arrives as an event during [`run`].
    ///
    /// [`run`]: Self::run
    pub async fn authenticate(&self, credentials: &Credentials) -> SessionResult<()> {
        info!("Authenticating as {}", credentials.username);
        self.client.handle().authenticate(credentials).await
    }

    /// Dispatch events to `handler` until the session ends.
    ///
    /// Login failures, CAPTCHA challenges and disconnects end the session
    /// with an error. `Ok` is returned only if the event stream closes
    /// without a disconnect notice.
    pub async fn run<H>(&mut self, handler: &H) -> SessionResult<()>
    where
        H: SessionEventHandler + ?Sized,
    {
        while let Some(event) = self.client.next_event().await {
            dispatch(event, handler).await?;
        }
        Ok(())
    }
}

async fn dispatch<H>(event: SessionEvent, handler: &H) -> SessionResult<()>
where
    H: SessionEventHandler + ?Sized,
{
    match event {
        SessionEvent::Authenticated => {
            info!("Bot is authenticated and ready to receive events");
            handler.on_authenticated().await;
        }
        SessionEvent::LoginFailed { reason } => {
            return Err(SessionError::AuthenticationFailed(reason));
        }
        SessionEvent::CaptchaChallenge { url } => {
            return Err(SessionError::CaptchaRequired { url });
        }
        SessionEvent::GroupStatus(status) => {
            handler.on_group_status_received(&status).await;
        }
        SessionEvent::Roster(response) => {
            handler.on_roster_received(&response).await;
        }
        SessionEvent::BridgeError { message } => {
            warn!("Chat bridge reported an error: {}", message);
        }
        SessionEvent::Disconnected { reason } => {
            return Err(SessionError::Disconnected(reason));
        }
    }
    Ok(())
}
