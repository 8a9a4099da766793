//! Application controller.
//!
//! Turns user actions into async steps and their completions into view
//! state events. Every event goes through one channel and is applied with
//! [`reduce`] in the order the steps finish.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use super::action::Action;
use crate::auth::{CancelHandle, Identity, InteractiveAuthenticator, SessionManager};
use crate::cache::TokenCache;
use crate::error::AppError;
use crate::products::{Product, ProductClient};
use crate::ui::{reduce, Event, ViewState};

/// Session manager shared between the controller and its tasks.
pub type SharedSession<A, C> = Arc<Mutex<SessionManager<A, C>>>;

/// Opens the provider end-session page for the user.
type LogoutOpener = Box<dyn Fn(&Url) -> io::Result<()>>;

/// Owns the view state and drives the session and product fetches.
pub struct App<A, C> {
    session: SharedSession<A, C>,
    products: Arc<ProductClient>,
    fetch_gate: Arc<Mutex<()>>,
    current_epoch: Arc<AtomicU64>,
    cancel: Option<CancelHandle>,
    provider_logout: Option<(Url, LogoutOpener)>,
    state: ViewState,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl<A, C> App<A, C>
where
    A: InteractiveAuthenticator + 'static,
    C: TokenCache + 'static,
{
    pub fn new(session: SessionManager<A, C>, products: ProductClient) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session: Arc::new(Mutex::new(session)),
            products: Arc::new(products),
            fetch_gate: Arc::new(Mutex::new(())),
            current_epoch: Arc::new(AtomicU64::new(0)),
            cancel: None,
            provider_logout: None,
            state: ViewState::default(),
            events_tx,
            events_rx,
        }
    }

    /// Handle used by the `cancel` action to abort a browser sign-in.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// End the provider session with `open` when a signed-in user signs out.
    pub fn with_provider_logout(
        mut self,
        logout_url: Url,
        open: impl Fn(&Url) -> io::Result<()> + 'static,
    ) -> Self {
        self.provider_logout = Some((logout_url, Box::new(open)));
        self
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn session(&self) -> SharedSession<A, C> {
        Arc::clone(&self.session)
    }

    /// Look for a cached identity in the background.
    pub fn start(&mut self) {
        let session = Arc::clone(&self.session);
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let event = match session.lock().await.check_existing_session() {
                Ok(identity) => Event::SessionChecked(identity),
                Err(e) => {
                    error!("Failed to check existing session: {}", e);
                    Event::SessionCheckFailed(e)
                }
            };
            let _ = tx.send(event);
        });
    }

    /// Handle a user action. Returns `false` once the app should quit.
    pub fn handle_action(&mut self, action: Action) -> bool {
        debug!("Action: {:?}", action);
        match action {
            Action::SignIn => self.sign_in(),
            Action::SignOut => self.sign_out(),
            Action::Refresh => {
                if self.state.authenticated {
                    self.spawn_fetch();
                } else {
                    info!("Refresh ignored, not signed in");
                }
            }
            Action::CancelSignIn => {
                let cancelled = self.cancel.as_ref().is_some_and(|c| c.cancel());
                if !cancelled {
                    debug!("No sign-in to cancel");
                }
            }
            Action::Quit => return false,
        }
        true
    }

    /// Wait for the next completion event and apply it.
    pub async fn process_next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.apply(event);
        }
    }

    /// Run until [`Action::Quit`] or the action channel closes.
    ///
    /// `render` is called with the initial state and after every change.
    pub async fn run(
        mut self,
        mut actions: mpsc::Receiver<Action>,
        mut render: impl FnMut(&ViewState),
    ) -> ViewState {
        self.start();
        render(&self.state);

        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => {
                        if !self.handle_action(action) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.apply(event),
            }
            render(&self.state);
        }

        info!("Shutting down");
        self.state
    }

    fn apply(&mut self, event: Event) {
        let current = self.state.epoch;
        let fetch = match &event {
            Event::SessionChecked(Some(_)) => true,
            Event::SignedIn { epoch, .. } => *epoch == current,
            _ => false,
        };
        let revoke = matches!(event, Event::Unauthorized { epoch } if epoch == current);
        let late_sign_in = matches!(event, Event::SignedIn { epoch, .. } if epoch != current);

        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, event);
        self.current_epoch.store(self.state.epoch, Ordering::SeqCst);

        if revoke {
            warn!("Access token rejected, signing out");
            self.spawn_cache_clear();
        }
        if late_sign_in {
            // The sign-in cached its account after the user signed out
            info!("Sign-in completed after sign-out, discarding it");
            self.spawn_cache_clear();
        }
        if fetch {
            self.spawn_fetch();
        }
    }

    fn sign_in(&mut self) {
        if self.state.loading && !self.state.authenticated {
            info!("Sign-in already in progress");
            return;
        }
        self.apply(Event::SignInStarted);
        let epoch = self.state.epoch;

        let session = Arc::clone(&self.session);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match session.lock().await.interactive_sign_in().await {
                Ok(identity) => Event::SignedIn { epoch, identity },
                Err(error) => {
                    if error.is_cancelled() {
                        info!("Sign-in cancelled");
                    } else {
                        error!("Sign-in failed: {}", error);
                    }
                    Event::SignInFailed { epoch, error }
                }
            };
            let _ = tx.send(event);
        });
    }

    fn sign_out(&mut self) {
        let was_signed_in = self.state.authenticated;
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        // Applied now so responses already in flight land in an old epoch
        self.apply(Event::SignedOut);
        self.spawn_cache_clear();

        if !was_signed_in {
            return;
        }
        if let Some((logout_url, open)) = &self.provider_logout {
            info!("Opening provider logout page");
            if let Err(e) = open(logout_url) {
                warn!("Failed to open logout page: {}", e);
            }
        }
    }

    fn spawn_cache_clear(&self) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            if let Err(e) = session.lock().await.sign_out() {
                error!("Failed to clear token cache: {}", e);
            }
        });
    }

    fn spawn_fetch(&mut self) {
        let Some(identity) = self.state.account.clone() else {
            return;
        };
        let epoch = self.state.epoch;
        self.apply(Event::FetchStarted { epoch });

        let session = Arc::clone(&self.session);
        let products = Arc::clone(&self.products);
        let gate = Arc::clone(&self.fetch_gate);
        let current_epoch = Arc::clone(&self.current_epoch);
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let _gate = gate.lock().await;
            if current_epoch.load(Ordering::SeqCst) != epoch {
                debug!("Skipping fetch for ended session (epoch {})", epoch);
                return;
            }

            let event = match fetch_for(&session, &products, &identity).await {
                Ok((products, token_expires_at)) => Event::ProductsLoaded {
                    epoch,
                    products,
                    token_expires_at,
                },
                Err(e) if e.requires_sign_out() => Event::Unauthorized { epoch },
                Err(error) => {
                    error!("Failed to load products: {}", error);
                    Event::ProductsFailed { epoch, error }
                }
            };
            let _ = tx.send(event);
        });
    }
}

async fn fetch_for<A, C>(
    session: &SharedSession<A, C>,
    products: &ProductClient,
    identity: &Identity,
) -> Result<(Vec<Product>, DateTime<Utc>), AppError>
where
    A: InteractiveAuthenticator,
    C: TokenCache,
{
    let credential = {
        let mut session = session.lock().await;
        let scopes = session.scopes().to_vec();
        session.get_credential(identity, &scopes).await?
    };

    let list = products.fetch_products(&credential).await?;
    Ok((list, credential.expires_at()))
}
