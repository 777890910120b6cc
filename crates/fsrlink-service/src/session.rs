//! Session control.
//!
//! [`SessionController`] is what the host talks to. It owns the link, reads
//! the device identifier and subscription target from the persisted
//! configuration, and writes a newly supplied identifier back to it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use fsrlink_core::{EventReceiver, LinkStateMachine, Radio, ReadingSink};
use fsrlink_types::{DeviceId, LinkState};

use crate::config::{Config, ConfigError, ConfigHandle};

/// Commands a host can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start streaming, optionally switching to (and persisting) `device`.
    Start { device: Option<DeviceId> },
    /// Stop streaming and release the connection.
    Stop,
    /// Start with the persisted device unless the link is already up.
    TakeOver,
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// No identifier was supplied and none is persisted.
    #[error("No device identifier supplied or configured")]
    NoDevice,
    /// The configuration could not be read or saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The link refused to start.
    #[error("Link failed to start: {0}")]
    Link(#[from] fsrlink_core::Error),
}

/// Composes the link with the persisted configuration.
pub struct SessionController {
    config: Arc<ConfigHandle>,
    link: LinkStateMachine,
}

impl SessionController {
    /// Create a controller. Link tuning is taken from the configuration as
    /// it is now; the device and target are read on every start.
    pub fn new(
        config: Arc<ConfigHandle>,
        radio: Arc<dyn Radio>,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        let options = config.read(Config::link_options);
        Self {
            link: LinkStateMachine::new(radio, sink, options),
            config,
        }
    }

    /// Dispatch a host command.
    pub async fn handle(&self, command: SessionCommand) -> Result<(), SessionError> {
        match command {
            SessionCommand::Start { device } => self.start(device).await,
            SessionCommand::Stop => {
                self.stop().await;
                Ok(())
            }
            SessionCommand::TakeOver => self.take_over().await,
        }
    }

    /// Start streaming.
    ///
    /// A supplied identifier is persisted first and replaces the previous
    /// one, in the running link too. Without one, the persisted identifier
    /// is used. If the link is already running this only records the
    /// identifier.
    #[tracing::instrument(skip_all, fields(device = device.as_ref().map(DeviceId::as_str)))]
    pub async fn start(&self, device: Option<DeviceId>) -> Result<(), SessionError> {
        let device = match device {
            Some(device) => {
                self.save_device(&device)?;
                device
            }
            None => self.device()?.ok_or_else(|| {
                error!("No device identifier configured");
                SessionError::NoDevice
            })?,
        };

        let target = self.config.read(|c| c.link.target()).map_err(|source| {
            error!(error = %source, "Subscription target is not configured correctly");
            ConfigError::Field {
                field: "subscription target",
                source,
            }
        })?;

        self.link.start(device, target).await?;
        Ok(())
    }

    /// Stop streaming and release the connection.
    ///
    /// Deliveries already handed off keep running. The persisted identifier
    /// is kept.
    pub async fn stop(&self) {
        self.link.stop().await;
        info!("Session stopped");
    }

    /// Start with the persisted identifier unless the link is already
    /// running or connected.
    pub async fn take_over(&self) -> Result<(), SessionError> {
        let state = self.link.state();
        if state.is_connected() || self.link.is_active().await {
            debug!(%state, "Link already running, nothing to take over");
            return Ok(());
        }
        self.start(None).await
    }

    /// Persist an identifier without connecting.
    pub fn save_device(&self, device: &DeviceId) -> Result<(), SessionError> {
        self.config
            .update(|c| c.link.device = Some(device.as_str().to_string()))?;
        info!(%device, "Device identifier saved");
        Ok(())
    }

    /// The persisted identifier, if any.
    pub fn device(&self) -> Result<Option<DeviceId>, SessionError> {
        self.config.read(|c| c.link.device()).map_err(|source| {
            ConfigError::Field {
                field: "link.device",
                source,
            }
            .into()
        })
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Receiver that observes every link state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.link.watch_state()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> EventReceiver {
        self.link.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use fsrlink_core::mock::{MockPeer, MockRadio, MockSink};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        dir: tempfile::TempDir,
        radio: Arc<MockRadio>,
        peer: Arc<MockPeer>,
        session: SessionController,
    }

    fn fixture(configure: impl FnOnce(&mut Config)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::template();
        config.reconnect.initial_delay_ms = 5;
        config.reconnect.jitter = false;
        configure(&mut config);
        let handle = ConfigHandle::new(dir.path().join("config.toml"), config);
        with_handle(dir, handle)
    }

    fn with_handle(dir: tempfile::TempDir, handle: ConfigHandle) -> Fixture {
        let peer = Arc::new(MockPeer::new("glove"));
        let radio = Arc::new(MockRadio::new().with_peer(Arc::clone(&peer)));
        let (sink, _readings) = MockSink::channel();
        let session = SessionController::new(Arc::new(handle), radio.clone(), sink);

        Fixture {
            dir,
            radio,
            peer,
            session,
        }
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    async fn wait_active(session: &SessionController) {
        timeout(
            WAIT,
            session
                .watch_state()
                .wait_for(|s| *s == LinkState::SubscriptionActive),
        )
        .await
        .unwrap()
        .unwrap();
    }

    fn persisted_device(path: &Path) -> Option<String> {
        Config::load(path).unwrap().link.device
    }

    #[tokio::test]
    async fn test_start_without_any_device() {
        let f = fixture(|_| {});

        let result = f.session.start(None).await;

        assert!(matches!(result, Err(SessionError::NoDevice)));
        assert_eq!(f.radio.resolve_count(), 0);
        assert_eq!(f.session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_persists_supplied_device() {
        let f = fixture(|_| {});

        f.session.start(Some(id("glove"))).await.unwrap();
        wait_active(&f.session).await;

        assert_eq!(f.session.device().unwrap(), Some(id("glove")));
        assert_eq!(
            persisted_device(&f.dir.path().join("config.toml")),
            Some("glove".to_string())
        );
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_start_uses_persisted_device() {
        let f = fixture(|c| c.link.device = Some("glove".to_string()));

        f.session.start(None).await.unwrap();
        wait_active(&f.session).await;

        assert_eq!(f.peer.connect_count(), 1);
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_bad_target_abandons_start() {
        let f = fixture(|c| {
            c.link.device = Some("glove".to_string());
            c.link.characteristic_uuid = Some("nonsense".to_string());
        });

        let result = f.session.start(None).await;

        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::Field { .. }))
        ));
        assert_eq!(f.radio.resolve_count(), 0);
        assert_eq!(f.peer.connect_count(), 0);
        assert_eq!(f.session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_target_abandons_start() {
        let f = fixture(|c| c.link.service_uuid = None);

        let result = f.session.start(Some(id("glove"))).await;

        assert!(matches!(result, Err(SessionError::Config(_))));
        assert_eq!(f.radio.resolve_count(), 0);
        // The supplied identifier is still remembered
        assert_eq!(f.session.device().unwrap(), Some(id("glove")));
    }

    #[tokio::test]
    async fn test_config_file_without_target_abandons_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[link]\ndevice = \"glove\"\n").unwrap();
        let handle = ConfigHandle::open(&path).unwrap();
        let f = with_handle(dir, handle);

        let result = f.session.start(None).await;
        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::Field { .. }))
        ));

        let result = f.session.take_over().await;
        assert!(matches!(result, Err(SessionError::Config(_))));

        assert_eq!(f.radio.resolve_count(), 0);
        assert_eq!(f.peer.connect_count(), 0);
        assert_eq!(f.session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_device_is_reported() {
        let f = fixture(|_| {});

        let result = f.session.start(Some(id("elsewhere"))).await;

        assert!(matches!(
            result,
            Err(SessionError::Link(fsrlink_core::Error::DeviceNotFound(_)))
        ));
        assert_eq!(f.session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_take_over_while_active_is_noop() {
        let f = fixture(|c| c.link.device = Some("glove".to_string()));
        f.session.start(None).await.unwrap();
        wait_active(&f.session).await;
        let resolves = f.radio.resolve_count();

        f.session.take_over().await.unwrap();
        f.session.handle(SessionCommand::TakeOver).await.unwrap();

        assert_eq!(f.peer.connect_count(), 1);
        assert_eq!(f.radio.resolve_count(), resolves);
        assert_eq!(f.session.state(), LinkState::SubscriptionActive);
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_take_over_when_idle_starts() {
        let f = fixture(|c| c.link.device = Some("glove".to_string()));

        f.session.take_over().await.unwrap();
        wait_active(&f.session).await;

        assert_eq!(f.peer.connect_count(), 1);
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_keeps_device_and_requires_start() {
        let f = fixture(|_| {});
        f.session
            .handle(SessionCommand::Start {
                device: Some(id("glove")),
            })
            .await
            .unwrap();
        wait_active(&f.session).await;

        f.session.handle(SessionCommand::Stop).await.unwrap();

        assert_eq!(f.session.state(), LinkState::Disconnected);
        assert!(!f.peer.is_connected());
        assert_eq!(f.session.device().unwrap(), Some(id("glove")));

        f.session.take_over().await.unwrap();
        wait_active(&f.session).await;
        assert_eq!(f.peer.connect_count(), 2);
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_start_while_running_supersedes_device() {
        let f = fixture(|_| {});
        f.session.start(Some(id("glove"))).await.unwrap();
        wait_active(&f.session).await;

        f.session.start(Some(id("other glove"))).await.unwrap();

        assert_eq!(f.session.device().unwrap(), Some(id("other glove")));
        assert_eq!(f.peer.connect_count(), 1);
        f.session.stop().await;
    }

    #[tokio::test]
    async fn test_save_device_does_not_connect() {
        let f = fixture(|_| {});

        f.session.save_device(&id("glove")).unwrap();

        assert_eq!(f.radio.resolve_count(), 0);
        assert_eq!(
            persisted_device(&f.dir.path().join("config.toml")),
            Some("glove".to_string())
        );
    }
}
