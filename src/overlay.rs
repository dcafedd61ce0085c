use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::{config::OverlaySource, obs::ControlError};

/// Opens sessions against the display controller.
#[async_trait]
pub trait Controller: Send + Sync {
    type Session: ControlSession;

    async fn connect(&self) -> Result<Self::Session, ControlError>;
}

/// One live session. `close` must be safe to call more than once and never
/// fails; errors while closing are only logged.
#[async_trait]
pub trait ControlSession: Send {
    async fn set_visible(
        &mut self,
        source: &OverlaySource,
        visible: bool,
    ) -> Result<(), ControlError>;

    async fn refresh_container(&mut self, source: &OverlaySource) -> Result<(), ControlError>;

    async fn close(&mut self);
}

#[derive(thiserror::Error, Debug)]
pub enum SequenceError {
    /// Nothing was touched.
    #[error("could not open a session: {0}")]
    Connect(ControlError),

    /// A step failed and the rest of the sequence was skipped.
    #[error(transparent)]
    Step(ControlError),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Sequence {
    /// Hide direct sources, then stop.
    Pause,
    /// Hide, wait, show direct sources, then refresh folders.
    Reload,
}

/// Drives the configured overlay sources through a controller.
pub struct Overlay<C> {
    controller: C,
    sources: Vec<OverlaySource>,
    reload_delay: Duration,
}

impl<C: Controller> Overlay<C> {
    pub fn new(controller: C, sources: Vec<OverlaySource>, reload_delay: Duration) -> Self {
        Self {
            controller,
            sources,
            reload_delay,
        }
    }

    /// Hides every direct source, waits, shows them again in the same order
    /// and finally refreshes every folder source.
    pub async fn reload(&self) -> Result<(), SequenceError> {
        self.run(Sequence::Reload).await
    }

    /// Hides every direct source.
    pub async fn hide(&self) -> Result<(), SequenceError> {
        self.run(Sequence::Pause).await
    }

    async fn run(&self, sequence: Sequence) -> Result<(), SequenceError> {
        let mut session = self
            .controller
            .connect()
            .await
            .map_err(SequenceError::Connect)?;
        let result = self.steps(&mut session, sequence).await;
        session.close().await;
        result.map_err(SequenceError::Step)
    }

    async fn steps(
        &self,
        session: &mut C::Session,
        sequence: Sequence,
    ) -> Result<(), ControlError> {
        for source in self.direct_sources() {
            session.set_visible(source, false).await?;
        }

        if sequence == Sequence::Pause {
            return Ok(());
        }

        info!("Waiting {}ms...", self.reload_delay.as_millis());
        tokio::time::sleep(self.reload_delay).await;

        for source in self.direct_sources() {
            session.set_visible(source, true).await?;
        }
        for source in self.sources.iter().filter(|source| !source.is_direct()) {
            session.refresh_container(source).await?;
        }

        info!("OBS sources refreshed.");
        Ok(())
    }

    fn direct_sources(&self) -> impl Iterator<Item = &OverlaySource> {
        self.sources.iter().filter(|source| source.is_direct())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SourceKind;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum Call {
        Connect,
        Show(String, bool),
        Refresh(String),
        Close,
    }

    /// Records every call with the (virtual) time it happened at.
    #[derive(Clone, Default)]
    pub(crate) struct FakeController {
        pub log: Arc<Mutex<Vec<(Instant, Call)>>>,
        pub refuse_connect: Arc<Mutex<bool>>,
        pub missing: Vec<String>,
        pub open: Arc<Mutex<(usize, usize)>>,
    }

    impl FakeController {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.log.lock().unwrap().iter().map(|(_, call)| call.clone()).collect()
        }

        pub(crate) fn clear(&self) {
            self.log.lock().unwrap().clear();
        }

        pub(crate) fn max_open_sessions(&self) -> usize {
            self.open.lock().unwrap().1
        }

        fn record(&self, call: Call) {
            self.log.lock().unwrap().push((Instant::now(), call));
        }
    }

    pub(crate) struct FakeSession {
        controller: FakeController,
        closed: bool,
    }

    #[async_trait]
    impl Controller for FakeController {
        type Session = FakeSession;

        async fn connect(&self) -> Result<FakeSession, ControlError> {
            self.record(Call::Connect);
            if *self.refuse_connect.lock().unwrap() {
                return Err(ControlError::Connect {
                    url: "ws://fake".into(),
                    reason: "refused".into(),
                });
            }
            let mut open = self.open.lock().unwrap();
            open.0 += 1;
            open.1 = open.1.max(open.0);
            Ok(FakeSession {
                controller: self.clone(),
                closed: false,
            })
        }
    }

    #[async_trait]
    impl ControlSession for FakeSession {
        async fn set_visible(
            &mut self,
            source: &OverlaySource,
            visible: bool,
        ) -> Result<(), ControlError> {
            if self.controller.missing.contains(&source.name) {
                return Err(ControlError::NotFound {
                    element: source.name.clone(),
                    container: source.scene_name.clone(),
                });
            }
            self.controller.record(Call::Show(source.name.clone(), visible));
            Ok(())
        }

        async fn refresh_container(&mut self, source: &OverlaySource) -> Result<(), ControlError> {
            self.controller.record(Call::Refresh(source.name.clone()));
            Ok(())
        }

        async fn close(&mut self) {
            if self.closed {
                return;
            }
            self.closed = true;
            self.controller.open.lock().unwrap().0 -= 1;
            self.controller.record(Call::Close);
        }
    }

    pub(crate) fn sources() -> Vec<OverlaySource> {
        vec![
            OverlaySource::new("Spotify", SourceKind::DirectSource, "overlay"),
            OverlaySource::new("Spotify Card", SourceKind::ContainerFolder, "overlay"),
            OverlaySource::new("Lyrics", SourceKind::DirectSource, "overlay"),
        ]
    }

    fn show(name: &str, visible: bool) -> Call {
        Call::Show(name.to_string(), visible)
    }

    #[tokio::test(start_paused = true)]
    async fn reload_hides_waits_shows_then_refreshes() {
        let controller = FakeController::default();
        let overlay = Overlay::new(controller.clone(), sources(), Duration::from_millis(1000));

        overlay.reload().await.unwrap();

        assert_eq!(
            controller.calls(),
            vec![
                Call::Connect,
                show("Spotify", false),
                show("Lyrics", false),
                show("Spotify", true),
                show("Lyrics", true),
                Call::Refresh("Spotify Card".into()),
                Call::Close,
            ]
        );

        let log = controller.log.lock().unwrap();
        let hidden_at = log[2].0;
        let shown_at = log[3].0;
        assert!(shown_at - hidden_at >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn hide_skips_wait_and_show() {
        let controller = FakeController::default();
        let overlay = Overlay::new(controller.clone(), sources(), Duration::from_millis(1000));
        let started = Instant::now();

        overlay.hide().await.unwrap();

        assert_eq!(
            controller.calls(),
            vec![
                Call::Connect,
                show("Spotify", false),
                show("Lyrics", false),
                Call::Close,
            ]
        );
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_aborts_but_still_closes() {
        let controller = FakeController {
            missing: vec!["Lyrics".into()],
            ..Default::default()
        };
        let overlay = Overlay::new(controller.clone(), sources(), Duration::from_millis(1000));

        let err = overlay.reload().await.unwrap_err();

        assert!(matches!(
            err,
            SequenceError::Step(ControlError::NotFound { ref element, .. }) if element == "Lyrics"
        ));
        assert_eq!(
            controller.calls(),
            vec![Call::Connect, show("Spotify", false), Call::Close]
        );
    }

    #[tokio::test]
    async fn connect_failure_touches_nothing() {
        let controller = FakeController::default();
        *controller.refuse_connect.lock().unwrap() = true;
        let overlay = Overlay::new(controller.clone(), sources(), Duration::ZERO);

        let err = overlay.reload().await.unwrap_err();

        assert!(matches!(err, SequenceError::Connect(_)));
        assert_eq!(controller.calls(), vec![Call::Connect]);
    }
}
