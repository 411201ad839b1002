//! Request dispatch: one protocol method per handler.

use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;

use termsup_core::{Engine, PaneMetadata};
use termsup_daemon_protocol::{
    parse_content, parse_event, parse_focus, parse_list, parse_liveness, parse_pane,
    parse_snapshot, Method, Request, Response, PROTOCOL_VERSION,
};

const DEFAULT_MAX_PENDING: usize = 20;

pub fn handle_request(request: Request, engine: &Engine) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let Request { method, id, params, .. } = request;
    match method {
        Method::GetHealth => {
            let mut data = json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "adapter": format!("{:?}", engine.config().daemon.adapter).to_lowercase(),
            });
            if let Ok(value) = serde_json::to_value(engine.health()) {
                data["engine"] = value;
            }
            Response::ok(id, data)
        }
        Method::Event => {
            let event = match parse_event(params) {
                Ok(event) => event,
                Err(err) => return Response::error_with_info(id, err),
            };
            let outcome = engine.submit(
                &event.source,
                &event.pane_id,
                &event.event_type,
                event.payload,
            );
            tracing::info!(
                source = %event.source,
                pane_id = %event.pane_id,
                event_type = %event.event_type,
                accepted = outcome.accepted,
                reason = %outcome.reason,
                "Received event"
            );
            if outcome.accepted {
                engine.drain_pane(&event.pane_id);
            }
            serialized(id, &outcome, "event outcome")
        }
        Method::Content => {
            let content = match parse_content(params) {
                Ok(content) => content,
                Err(err) => return Response::error_with_info(id, err),
            };
            if content.has_metadata() {
                engine.update_metadata(
                    &content.pane_id,
                    PaneMetadata {
                        job_name: content.job_name.clone().unwrap_or_default(),
                        title: content.title.clone().unwrap_or_default(),
                        command_line: content.command_line.clone().unwrap_or_default(),
                    },
                );
            }
            let outcome = engine.submit_content(
                &content.pane_id,
                &content.content,
                content.content_hash.as_deref(),
            );
            if !outcome.enqueued.is_empty() {
                engine.drain_pane(&content.pane_id);
            }
            serialized(id, &outcome, "content outcome")
        }
        Method::GetStatus => {
            let pane = match parse_pane(params) {
                Ok(pane) => pane,
                Err(err) => return Response::error_with_info(id, err),
            };
            match engine.query_status(&pane.pane_id) {
                Some(status) => serialized(id, &status, "pane status"),
                None => Response::ok(id, json!({ "found": false, "pane_id": pane.pane_id })),
            }
        }
        Method::GetSnapshot => {
            let params = match parse_snapshot(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let snapshot = engine.debug_snapshot(
                &params.pane_id,
                params.max_history,
                params.max_pending.unwrap_or(DEFAULT_MAX_PENDING),
            );
            match snapshot {
                Some(snapshot) => serialized(id, &snapshot, "pane snapshot"),
                None => Response::ok(id, json!({ "found": false, "pane_id": params.pane_id })),
            }
        }
        Method::ListSnapshots => {
            let params = match parse_list(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let offset = params.offset.unwrap_or(0);
            let (panes, total) = engine.list_snapshots(params.limit, offset);
            tracing::debug!(panes = panes.len(), total, offset, "Snapshot listing");
            #[derive(Serialize)]
            struct Listing<'a> {
                total: usize,
                offset: usize,
                limit: Option<usize>,
                panes: &'a [termsup_core::PaneSummary],
            }
            serialized(
                id,
                &Listing {
                    total,
                    offset,
                    limit: params.limit,
                    panes: &panes,
                },
                "snapshot listing",
            )
        }
        Method::SyncLiveness => {
            let params = match parse_liveness(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let live: HashSet<String> = params.pane_ids.into_iter().collect();
            let closed = engine.sync_liveness(&live);
            Response::ok(id, json!({ "live": live.len(), "closed": closed }))
        }
        Method::BumpGeneration => {
            let pane = match parse_pane(params) {
                Ok(pane) => pane,
                Err(err) => return Response::error_with_info(id, err),
            };
            let generation = engine.bump_generation(&pane.pane_id);
            Response::ok(
                id,
                json!({ "pane_id": pane.pane_id, "generation": generation }),
            )
        }
        Method::RemovePane => {
            let pane = match parse_pane(params) {
                Ok(pane) => pane,
                Err(err) => return Response::error_with_info(id, err),
            };
            let removed = engine.remove_pane(&pane.pane_id);
            Response::ok(id, json!({ "pane_id": pane.pane_id, "removed": removed }))
        }
        Method::SetFocus => {
            let params = match parse_focus(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let outcome = engine.set_focus(params.pane_id.as_deref());
            if let (Some(pane_id), Some(outcome)) = (params.pane_id.as_deref(), outcome.as_ref()) {
                if outcome.accepted {
                    engine.drain_pane(pane_id);
                }
            }
            Response::ok(
                id,
                json!({ "focused_pane": engine.focused_pane(), "outcome": outcome }),
            )
        }
    }
}

fn serialized<T: Serialize>(id: Option<String>, value: &T, what: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}
