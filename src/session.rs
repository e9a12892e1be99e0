//! Access token lifecycle.
//!
//! The token is refreshed before it expires rather than after the API starts
//! refusing it. Concurrent callers never trigger more than one login: while a login
//! is in flight the cache holds the login future itself, and every caller awaits
//! that same future.

use crate::api::{self, Error};
use crate::model::{Api, Credentials, Token};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Tokens closer than this to their expiry are refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

type Login = Shared<BoxFuture<'static, Result<Arc<Token>, Error>>>;

enum State {
    Empty,
    Ready(Arc<Token>),
    LoggingIn { attempt: u64, login: Login },
}

struct Cache {
    state: State,
    attempts: u64,
}

pub struct SessionManager {
    api: Api,
    credentials: Arc<Credentials>,
    refresh_margin: Duration,
    cache: Mutex<Cache>,
}

impl SessionManager {
    pub fn new(api: Api, credentials: Credentials, refresh_margin: Duration) -> Self {
        SessionManager {
            api,
            credentials: Arc::new(credentials),
            refresh_margin,
            cache: Mutex::new(Cache {
                state: State::Empty,
                attempts: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn login(&self) -> Login {
        let api = self.api.clone();
        let credentials = Arc::clone(&self.credentials);

        async move {
            log::debug!("Requesting access token for {}", credentials.email);
            api::obtain_token(&api, &credentials).await.map(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Return a token valid for longer than the refresh margin, logging in if needed.
    ///
    /// Fails with `Error::Auth`; there is no retry, the caller decides when to try again.
    pub async fn valid_token(&self) -> Result<Arc<Token>, Error> {
        let (attempt, login) = {
            let mut cache = self.lock();

            let pending = match &cache.state {
                State::Ready(token) if token.is_fresh(self.refresh_margin) => {
                    return Ok(Arc::clone(token));
                }
                State::LoggingIn { attempt, login } => Some((*attempt, login.clone())),
                _ => None,
            };

            match pending {
                Some(pending) => pending,
                None => {
                    cache.attempts += 1;
                    let attempt = cache.attempts;
                    let login = self.login();
                    cache.state = State::LoggingIn {
                        attempt,
                        login: login.clone(),
                    };
                    (attempt, login)
                }
            }
        };

        let result = login.await;

        /* only the attempt still in the cache may settle it */
        let mut cache = self.lock();
        let current =
            matches!(cache.state, State::LoggingIn { attempt: a, .. } if a == attempt);
        if current {
            cache.state = match &result {
                Ok(token) => {
                    if !token.is_fresh(self.refresh_margin) {
                        log::warn!(
                            "Access token lifetime ({}s) is shorter than the refresh margin",
                            token.expires_in().as_secs()
                        );
                    }
                    State::Ready(Arc::clone(token))
                }
                Err(e) => {
                    log::error!("Unable to obtain access token: {}", e);
                    State::Empty
                }
            };
        }

        result
    }

    /// Forget `token` so the next access logs in again. A newer token is left alone.
    pub fn invalidate(&self, token: &Token) {
        let mut cache = self.lock();
        let current = matches!(&cache.state, State::Ready(cached) if std::ptr::eq(Arc::as_ptr(cached), token));
        if current {
            log::info!("Access token rejected, logging in again on next access");
            cache.state = State::Empty;
        }
    }

    /// `true` if a token is cached and fresh.
    pub fn has_valid_token(&self) -> bool {
        matches!(&self.lock().state, State::Ready(token) if token.is_fresh(self.refresh_margin))
    }
}
