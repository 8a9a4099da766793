//! One-shot loopback listener for the authorization redirect.
//!
//! Binds the redirect URI's port on 127.0.0.1, answers the browser with a
//! small HTML page and hands the full redirect URL back to the caller.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use url::Url;

/// How often the listener checks for cancellation and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of waiting for the redirect.
#[derive(Debug, PartialEq)]
pub enum CallbackResult {
    /// Full redirect URL, including `code`/`state` or `error` parameters.
    Success(String),
    Cancelled,
    TimedOut,
    Error(String),
}

/// What a single browser request turned out to be.
enum Request {
    /// Redirect from the provider, successful or not.
    Redirect(Url),
    /// Anything else (favicon, probes); answered and ignored.
    Ignored,
}

/// Wait for one redirect on `port`.
///
/// Blocks the calling thread. Stops early when `cancel_rx` fires or is
/// dropped, or once `timeout` has elapsed.
pub fn start_callback_server(
    port: u16,
    timeout: Duration,
    cancel_rx: mpsc::Receiver<()>,
) -> CallbackResult {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind callback listener on port {}: {}", port, e);
            return CallbackResult::Error(format!("Failed to start server: {}", e));
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        return CallbackResult::Error(format!("Server configuration error: {}", e));
    }

    info!("Waiting for sign-in redirect on port {}", port);
    let deadline = Instant::now() + timeout;

    loop {
        if !matches!(cancel_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            info!("Sign-in listener cancelled");
            return CallbackResult::Cancelled;
        }
        if Instant::now() >= deadline {
            info!("Sign-in listener timed out");
            return CallbackResult::TimedOut;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Callback connection from {}", peer);
                if let Request::Redirect(url) = serve(stream, port) {
                    return CallbackResult::Success(url.into());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                error!("Callback listener failed: {}", e);
                return CallbackResult::Error(format!("Connection error: {}", e));
            }
        }
    }
}

/// Read one request, answer it, and classify it.
fn serve(mut stream: TcpStream, port: u16) -> Request {
    // Accepted sockets may inherit non-blocking mode
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let len = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read callback request: {}", e);
            return Request::Ignored;
        }
    };
    let request = String::from_utf8_lossy(&buffer[..len]);

    let mut request_line = request.lines().next().unwrap_or_default().split_whitespace();
    let (method, target) = match (request_line.next(), request_line.next()) {
        (Some(method), Some(target)) => (method, target),
        _ => {
            respond(&mut stream, "400 Bad Request", "text/plain", "Bad Request");
            return Request::Ignored;
        }
    };
    debug!("Callback request: {} {}", method, target);

    if method != "GET" {
        respond(&mut stream, "405 Method Not Allowed", "text/plain", "Method Not Allowed");
        return Request::Ignored;
    }

    let url = match Url::parse(&format!("http://localhost:{}{}", port, target)) {
        Ok(url) if url.path() == "/callback" => url,
        _ => {
            respond(&mut stream, "404 Not Found", "text/plain", "Not Found");
            return Request::Ignored;
        }
    };

    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    let page = match (param("error"), param("code")) {
        (Some(error), _) => {
            let reason = param("error_description").unwrap_or(error);
            result_page(
                "Sign-in Failed",
                &html_escape(&reason),
                "You can close this tab and try again.",
            )
        }
        (None, Some(_)) => result_page(
            "Sign-in Successful",
            "You are signed in to Product Viewer.",
            "You can close this tab and return to the terminal.",
        ),
        (None, None) => {
            respond(&mut stream, "400 Bad Request", "text/plain", "Missing authorization code");
            return Request::Ignored;
        }
    };

    respond(&mut stream, "200 OK", "text/html; charset=utf-8", &page);
    Request::Redirect(url)
}

fn result_page(title: &str, message: &str, hint: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: 'Segoe UI', Roboto, sans-serif; background: #111827; color: #F9FAFB;
               min-height: 100vh; display: flex; align-items: center; justify-content: center; }}
        .card {{ background: #1F2937; padding: 2.5rem; border-radius: 0.75rem; text-align: center; max-width: 420px; }}
        h1 {{ color: #818CF8; font-size: 1.5rem; }}
        .hint {{ font-size: 0.875rem; color: #9CA3AF; }}
    </style>
</head>
<body>
    <div class="card">
        <h1>{title}</h1>
        <p>{message}</p>
        <p class="hint">{hint}</p>
    </div>
</body>
</html>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
