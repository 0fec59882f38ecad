use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Scope, web};
use serde::Deserialize;

use crate::accessory::AccessoryRegistry;

/// Push notification sent by motion inputs through the gate's scripting.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MotionInput {
    clu: String,
    id: String,
    state: bool,
}

pub fn new_routes(registry: AccessoryRegistry) -> Scope {
    web::scope("")
        .app_data(web::Data::new(registry))
        .route("/update", web::post().to(handle_update))
}

async fn handle_update(request: HttpRequest, body: web::Bytes, registry: web::Data<AccessoryRegistry>) -> HttpResponse {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().starts_with("application/json"));

    if !is_json {
        return HttpResponse::UnsupportedMediaType().body("expected application/json");
    }

    let input: MotionInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!("Undecodable motion input from {:?}: {}", request.peer_addr(), e);
            return HttpResponse::BadRequest().finish();
        }
    };

    let Some(sensor) = registry.find_motion_sensor(&input.clu, &input.id) else {
        tracing::warn!("Motion input for unknown sensor [clu: {} id: {}]", input.clu, input.id);
        return HttpResponse::NotFound().finish();
    };

    tracing::debug!("Motion input for [{}|{}]: {}", input.clu, input.id, input.state);
    sensor.push(input.state);

    HttpResponse::Ok().finish()
}
