use crate::api::{self, Error};
use crate::model::{Api, ControlCommand};
use crate::session::SessionManager;
use std::sync::Arc;

/// Sends control commands outside of the polling cycle.
///
/// A command never touches the snapshot; the device's new state shows up on the
/// next poll.
pub struct CommandDispatcher {
    api: Api,
    session: Arc<SessionManager>,
}

impl CommandDispatcher {
    pub fn new(api: Api, session: Arc<SessionManager>) -> Self {
        CommandDispatcher { api, session }
    }

    async fn send(&self, command: &ControlCommand) -> Result<(), Error> {
        let token = self.session.valid_token().await?;

        api::control(&self.api, &token, command)
            .await
            .map_err(|error| {
                if error.is_auth() {
                    self.session.invalidate(&token);
                }
                error
            })
    }

    /// Validate and send `command`, one attempt.
    ///
    /// Out-of-range values fail with `Error::InvalidCommand` without a request being
    /// made. Any other failure comes back as `Error::Command`.
    pub async fn issue(&self, command: &ControlCommand) -> Result<(), Error> {
        command.validate()?;

        log::info!(
            "Setting {} on device {}",
            command.command.name(),
            command.device_sn
        );

        self.send(command).await.map_err(|reason| {
            log::error!(
                "Unable to set {} on device {}: {}",
                command.command.name(),
                command.device_sn,
                reason
            );
            Error::Command {
                device_sn: command.device_sn.clone(),
                command: command.command.name(),
                reason: Box::new(reason),
            }
        })
    }
}
