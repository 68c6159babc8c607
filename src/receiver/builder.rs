//! Builder for [`Receiver`]

use uuid::Uuid;

use crate::disposition::Disposition;
use crate::error::Error;
use crate::receiver::{ReceiveMode, Receiver, ReceiverConfig};
use crate::transport::{SessionFilter, Transport};

/// Default credit when none is configured
const DEFAULT_PREFETCH: u32 = 1;

/// A configuration option failed validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The entity path was empty or never set
    #[error("entity path must not be empty")]
    EmptyEntityPath,

    /// Prefetch of zero would starve the link of credit
    #[error("prefetch credit must be at least 1")]
    ZeroPrefetch,

    /// A session id was requested but empty
    #[error("session id must not be empty")]
    EmptySessionId,

    /// A receiver name was supplied but empty
    #[error("receiver name must not be empty")]
    EmptyName,
}

/// Configures and attaches a [`Receiver`]
///
/// Options are validated in [`attach`](Builder::attach) before the first
/// link is established; any invalid option aborts construction.
///
/// ```rust,ignore
/// let receiver = Receiver::builder()
///     .entity_path("queue-1")
///     .mode(ReceiveMode::PeekLock)
///     .prefetch(10)
///     .default_disposition(Disposition::Accept)
///     .attach(transport)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    entity_path: String,
    name: Option<String>,
    mode: ReceiveMode,
    prefetch: u32,
    session_filter: Option<SessionFilter>,
    default_disposition: Option<Disposition>,
}

impl Builder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            entity_path: String::new(),
            name: None,
            mode: ReceiveMode::default(),
            prefetch: DEFAULT_PREFETCH,
            session_filter: None,
            default_disposition: None,
        }
    }

    /// Set the entity path to receive from
    pub fn entity_path(mut self, entity_path: impl Into<String>) -> Self {
        self.entity_path = entity_path.into();
        self
    }

    /// Set the client-assigned receiver name, also used as the link name
    ///
    /// Defaults to a generated `receiver-<uuid>` name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the receive mode
    pub fn mode(mut self, mode: ReceiveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of messages the transport may buffer ahead of
    /// consumption
    ///
    /// Under `PeekLock` a large prefetch can let message locks expire
    /// before the handler sees them; the default of 1 fetches one message
    /// at a time.
    pub fn prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Bind the receiver to one specific broker-side session
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_filter = Some(SessionFilter::Id(session_id.into()));
        self
    }

    /// Bind the receiver to whichever session the broker picks
    pub fn any_session(mut self) -> Self {
        self.session_filter = Some(SessionFilter::Any);
        self
    }

    /// Disposition applied after a successful handler invocation when the
    /// handler did not settle the message itself
    ///
    /// Only meaningful under `PeekLock`; in `ReceiveAndDelete` mode the
    /// message is already settled on receipt and the default disposition is
    /// never invoked.
    pub fn default_disposition(mut self, disposition: Disposition) -> Self {
        self.default_disposition = Some(disposition);
        self
    }

    /// Validate the configuration and attach the receiver
    ///
    /// Performs one attempt to establish the connection, session and link;
    /// a failure is returned without retrying.
    pub async fn attach<T: Transport>(self, transport: T) -> Result<Receiver<T>, Error> {
        let config = self.validate()?;
        Receiver::attach_with_config(transport, config).await
    }

    fn validate(self) -> Result<ReceiverConfig, ConfigError> {
        if self.entity_path.is_empty() {
            return Err(ConfigError::EmptyEntityPath);
        }
        if self.prefetch == 0 {
            return Err(ConfigError::ZeroPrefetch);
        }
        if let Some(SessionFilter::Id(id)) = &self.session_filter {
            if id.is_empty() {
                return Err(ConfigError::EmptySessionId);
            }
        }
        let name = match self.name {
            Some(name) if name.is_empty() => return Err(ConfigError::EmptyName),
            Some(name) => name,
            None => format!("receiver-{}", Uuid::new_v4()),
        };
        Ok(ReceiverConfig {
            entity_path: self.entity_path,
            name,
            mode: self.mode,
            prefetch: self.prefetch,
            session_filter: self.session_filter,
            default_disposition: self.default_disposition,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
