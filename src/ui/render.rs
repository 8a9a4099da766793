//! Plain-text rendering of the view state.

use std::fmt::Write;

use crate::auth::credential::{format_duration, time_until_expiry};
use crate::ui::state::ViewState;

const TITLE: &str = "Product Viewer";

/// Render the whole screen for `state`.
pub fn render(state: &ViewState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", TITLE);
    let _ = writeln!(out, "{}", "=".repeat(TITLE.len()));
    let _ = writeln!(out, "{}", state.status);

    if state.loading {
        let _ = writeln!(out, "Loading...");
    }

    if state.authenticated {
        render_signed_in(state, &mut out);
    } else {
        let _ = writeln!(out);
        let _ = writeln!(out, "Commands: signin, cancel, quit");
    }

    out
}

fn render_signed_in(state: &ViewState, out: &mut String) {
    if let Some(account) = &state.account {
        let _ = writeln!(out, "Signed in as {}", account.display_name());
    }
    if let Some(expires_at) = state.token_expires_at {
        match time_until_expiry(expires_at) {
            Some(remaining) => {
                let _ = writeln!(out, "Token expires in {}", format_duration(remaining));
            }
            None => {
                let _ = writeln!(out, "Token expired");
            }
        }
    }

    if let Some(products) = &state.products {
        let _ = writeln!(out);
        let _ = writeln!(out, "Available Products");
        if products.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for product in products {
            let _ = writeln!(out, "  {} - {}", product.name, product.display_price());
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Commands: refresh, signout, quit");
}
