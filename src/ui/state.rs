//! View state and its transition function.
//!
//! [`reduce`] is the only writer of the view state. Completion events carry
//! the session epoch they were started under; events from an older epoch
//! are dropped so a late response cannot repopulate a signed-out view.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::auth::Identity;
use crate::error::{AppError, AuthError, CacheError, FetchError};
use crate::products::Product;

pub const SIGNED_OUT_STATUS: &str = "Please sign in to view products.";
pub const FETCHING_STATUS: &str = "Signed in. Fetching products...";
pub const LOADED_STATUS: &str = "Products loaded successfully.";

/// Everything the frontend renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub authenticated: bool,
    pub products: Option<Vec<Product>>,
    pub status: String,
    pub loading: bool,
    pub account: Option<Identity>,
    /// Expiry of the credential used for the last successful fetch.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Bumped whenever the session changes.
    pub epoch: u64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            authenticated: false,
            products: None,
            status: String::new(),
            loading: false,
            account: None,
            token_expires_at: None,
            epoch: 0,
        }
    }
}

impl ViewState {
    fn signed_in(self, identity: Identity) -> Self {
        Self {
            authenticated: true,
            products: None,
            status: FETCHING_STATUS.to_string(),
            loading: false,
            account: Some(identity),
            token_expires_at: None,
            epoch: self.epoch + 1,
        }
    }

    fn signed_out(self, status: String) -> Self {
        Self {
            authenticated: false,
            products: None,
            status,
            loading: false,
            account: None,
            token_expires_at: None,
            epoch: self.epoch + 1,
        }
    }
}

/// Something that happened to the session or a request.
#[derive(Debug)]
pub enum Event {
    SessionChecked(Option<Identity>),
    SessionCheckFailed(CacheError),
    SignInStarted,
    SignedIn {
        epoch: u64,
        identity: Identity,
    },
    SignInFailed {
        epoch: u64,
        error: AuthError,
    },
    FetchStarted {
        epoch: u64,
    },
    ProductsLoaded {
        epoch: u64,
        products: Vec<Product>,
        token_expires_at: DateTime<Utc>,
    },
    Unauthorized {
        epoch: u64,
    },
    ProductsFailed {
        epoch: u64,
        error: AppError,
    },
    SignedOut,
}

/// Apply `event` to `state`.
pub fn reduce(state: ViewState, event: Event) -> ViewState {
    match event {
        Event::SessionChecked(Some(identity)) => state.signed_in(identity),
        Event::SessionChecked(None) => ViewState {
            authenticated: false,
            products: None,
            account: None,
            status: SIGNED_OUT_STATUS.to_string(),
            ..state
        },
        Event::SessionCheckFailed(e) => ViewState {
            status: AppError::from(e).user_message(),
            ..state
        },
        Event::SignInStarted => ViewState {
            loading: true,
            ..state
        },
        Event::SignedIn { epoch, identity } if epoch == state.epoch => state.signed_in(identity),
        Event::SignInFailed { epoch, error } if epoch == state.epoch => ViewState {
            loading: false,
            status: AppError::from(error).user_message(),
            ..state
        },
        Event::FetchStarted { epoch } if epoch == state.epoch => ViewState {
            loading: true,
            ..state
        },
        Event::ProductsLoaded {
            epoch,
            products,
            token_expires_at,
        } if epoch == state.epoch && state.authenticated => ViewState {
            products: Some(products),
            status: LOADED_STATUS.to_string(),
            loading: false,
            token_expires_at: Some(token_expires_at),
            ..state
        },
        Event::Unauthorized { epoch } if epoch == state.epoch => {
            state.signed_out(AppError::Fetch(FetchError::Unauthorized).user_message())
        }
        Event::ProductsFailed { epoch, error } if epoch == state.epoch => ViewState {
            status: error.user_message(),
            loading: false,
            ..state
        },
        Event::SignedOut => state.signed_out(SIGNED_OUT_STATUS.to_string()),
        stale => {
            debug!("Discarding stale event {:?} (epoch {})", stale, state.epoch);
            state
        }
    }
}
