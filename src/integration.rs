//! One configured account: session, poller and command dispatcher wired together.

use crate::api;
use crate::command::CommandDispatcher;
use crate::config::Settings;
use crate::coordinator::{Coordinator, RefreshOutcome, Status, SubscriptionId, Update};
use crate::model::{ControlCommand, Snapshot};
use crate::session::SessionManager;
use crate::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Integration {
    session: Arc<SessionManager>,
    coordinator: Arc<Coordinator>,
    commands: CommandDispatcher,
    poller: Mutex<Option<Poller>>,
}

impl Integration {
    /// Build the components from `settings`. Nothing goes on the wire yet.
    pub fn configure(settings: &Settings) -> Result<Self, Error> {
        settings.validate()?;

        let credentials = settings.credentials()?;
        let api = api::api(credentials.api_url.clone(), settings.timeout())?;
        let session = Arc::new(SessionManager::new(
            api.clone(),
            credentials,
            settings.token_refresh_margin(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&session),
            api.clone(),
            settings.coordinator_options(),
        ));
        let commands = CommandDispatcher::new(api, Arc::clone(&session));

        Ok(Integration {
            session,
            coordinator,
            commands,
            poller: Mutex::new(None),
        })
    }

    fn poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the credentials with one login, run the first update and start polling.
    ///
    /// On error nothing is left running; the caller may retry later.
    pub async fn setup(&self) -> Result<Arc<Snapshot>, Error> {
        self.session.valid_token().await?;
        let snapshot = self.coordinator.first_refresh().await?;
        self.start();
        Ok(snapshot)
    }

    /// Start the poller unless it is already running.
    pub fn start(&self) {
        let mut poller = self.poller();
        if poller.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&self.coordinator).spawn(cancel.clone());
        *poller = Some(Poller { cancel, handle });
    }

    pub fn is_polling(&self) -> bool {
        self.poller().is_some()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.coordinator.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.coordinator.unsubscribe(id)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.coordinator.snapshot()
    }

    pub async fn issue_command(&self, command: &ControlCommand) -> Result<(), Error> {
        self.commands.issue(command).await
    }

    /// Run one update now, outside the schedule.
    pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
        self.coordinator.refresh().await
    }

    pub fn status(&self) -> Status {
        self.coordinator.status()
    }

    /// Stop polling and wait for the poller to exit. Updates in flight are abandoned
    /// and torn down before this returns.
    pub async fn shutdown(&self) {
        let poller = self.poller().take();

        if let Some(Poller { cancel, handle }) = poller {
            cancel.cancel();
            if let Err(e) = handle.await {
                log::error!("Poller did not stop cleanly: {}", e);
            }
        }
    }
}

impl Drop for Integration {
    fn drop(&mut self) {
        if let Some(poller) = self.poller().take() {
            poller.cancel.cancel();
        }
    }
}
