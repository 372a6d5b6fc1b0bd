//! Thin HTTP surfaces (spec §4.10): the public webhook receiver and the
//! private admin/status listener. Both are blocking `tiny_http` accept
//! loops meant to run on a dedicated OS thread — the rest of this codebase
//! favors blocking I/O over an async runtime (see `rotor-core::intake`),
//! and a one-thread-per-listener HTTP server composes with that directly.
//!
//! Neither surface does any interesting work itself: a well-formed request
//! is translated into an event pushed onto the intake queue (webhooks,
//! admin refresh) or a snapshot read off the shared engine (status). All
//! orchestration logic lives in `rotor-core`.

use std::io::Read;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde::Deserialize;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{info, warn};

use rotor_core::adapters::{RuntimeAdapter, VcsAdapter};
use rotor_core::engine::Engine;
use rotor_core::intake::EventSender;
use rotor_core::project::ProjectId;
use rotor_core::status::StatusSnapshot;
use rotor_core::Event;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    clone_url: String,
}

/// Serve `POST {"clone_url": "..."}` → `202 Accepted` plus one
/// `Event::Webhook` pushed onto `sender`. Never blocks on the pull or build
/// the event eventually triggers (spec §4.10).
pub fn run_webhook_server(addr: &str, sender: EventSender) -> anyhow::Result<()> {
    let server = Server::http(addr).map_err(|e| anyhow!("binding webhook listener on {addr}: {e}"))?;
    info!(addr, "webhook listener started");

    for mut request in server.incoming_requests() {
        if request.method() != &Method::Post {
            respond(request, 405, None);
            continue;
        }

        let mut body = String::new();
        if request.as_reader().read_to_string(&mut body).is_err() {
            respond(request, 400, None);
            continue;
        }

        match serde_json::from_str::<WebhookPayload>(&body) {
            Ok(payload) => {
                info!(clone_url = %payload.clone_url, "webhook received");
                sender.send(Event::Webhook {
                    clone_url: payload.clone_url,
                });
                respond(request, 202, None);
            }
            Err(e) => {
                warn!(error = %e, "malformed webhook body");
                respond(request, 400, None);
            }
        }
    }
    Ok(())
}

/// Serve the read-only admin surface (spec §4.10):
///   `GET  /status`              → JSON [`StatusSnapshot`]
///   `POST /projects/{i}/refresh` → pushes `Event::AdminRefresh`, `202`
///
/// Intended to be bound to a separate, firewalled listener address from the
/// public webhook receiver.
pub fn run_admin_server<V, R>(
    addr: &str,
    engine: Arc<Mutex<Engine<V, R>>>,
    sender: EventSender,
) -> anyhow::Result<()>
where
    V: VcsAdapter + 'static,
    R: RuntimeAdapter + 'static,
{
    let server = Server::http(addr).map_err(|e| anyhow!("binding admin listener on {addr}: {e}"))?;
    info!(addr, "admin listener started");

    for request in server.incoming_requests() {
        let method = request.method().clone();
        let url = request.url().to_string();

        if method == Method::Get && (url == "/status" || url == "/") {
            let snapshot = {
                let guard = engine.lock().expect("engine mutex poisoned");
                StatusSnapshot::build(guard.repos(), guard.projects())
            };
            respond_json(request, &snapshot);
            continue;
        }

        if method == Method::Post {
            if let Some(index) = parse_refresh_path(&url) {
                let known = {
                    let guard = engine.lock().expect("engine mutex poisoned");
                    guard.projects().get(ProjectId(index)).is_some()
                };
                if known {
                    sender.send(Event::AdminRefresh {
                        project_index: index,
                    });
                    respond(request, 202, None);
                } else {
                    respond(request, 404, None);
                }
                continue;
            }
        }

        respond(request, 404, None);
    }
    Ok(())
}

/// Parse `/projects/{index}/refresh` into `index`, or `None` if the path
/// doesn't match that shape.
fn parse_refresh_path(url: &str) -> Option<usize> {
    let rest = url.strip_prefix("/projects/")?;
    let index = rest.strip_suffix("/refresh")?;
    index.parse().ok()
}

fn respond(request: Request, status: u16, body: Option<String>) {
    let response = match body {
        Some(b) => Response::from_string(b),
        None => Response::from_string(String::new()),
    }
    .with_status_code(status);
    let _ = request.respond(response);
}

fn respond_json<T: serde::Serialize>(request: Request, value: &T) {
    match serde_json::to_string(value) {
        Ok(body) => {
            let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header is valid");
            let response = Response::from_string(body).with_header(header);
            let _ = request.respond(response);
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize status snapshot");
            respond(request, 500, None);
        }
    }
}
