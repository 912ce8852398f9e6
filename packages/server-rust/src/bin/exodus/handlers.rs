//! In-process handlers referenced by the manifest.

use exodus_server::engine::{HandlerResponse, Registrar};

pub fn register(r: &mut Registrar) {
    r.handler_fn("health.ok", |_ctx, _body| async {
        Ok(HandlerResponse::ok(r#"{"status":"ok"}"#))
    })
    .handler_fn("echo.body", |_ctx, body| async move {
        if body.is_empty() {
            Ok(HandlerResponse::ok("{}"))
        } else {
            Ok(HandlerResponse::ok(body))
        }
    })
    .handler_fn("admin.ping", |_ctx, _body| async {
        Ok(HandlerResponse::ok(r#"{"pong":true}"#))
    });
}
