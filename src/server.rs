use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tracing::{error, info};

use crate::store::Store;

#[derive(Clone)]
struct ServerState {
    store: Store,
}

/// Health check, banner and click-tracking redirects.
pub fn router(store: Store) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/go/{product_id}", get(go))
        .with_state(ServerState { store })
}

async fn index() -> &'static str {
    "promobot is running"
}

async fn health() -> &'static str {
    "OK"
}

/// Count the click, then send the visitor to the affiliate link.
async fn go(State(state): State<ServerState>, Path(product_id): Path<String>) -> Response {
    let record = match state.store.posted_record(&product_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return (StatusCode::NOT_FOUND, "Unknown product").into_response(),
        Err(e) => {
            error!("Click lookup failed for {}: {:#}", product_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(e) = state.store.record_click(&product_id, Utc::now()).await {
        error!("Failed to record click for {}: {:#}", product_id, e);
    } else {
        info!("Click recorded: {}", product_id);
    }
    (StatusCode::FOUND, [(header::LOCATION, record.affiliate_url)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = router(Store::open_in_memory().unwrap());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_click_redirects_and_counts() {
        let store = Store::open_in_memory().unwrap();
        let product = sample_products("T", 1).remove(0);
        store
            .record_post(&product, 70.0, "electronics", Utc::now())
            .await
            .unwrap();

        let app = router(store.clone());
        let resp = app
            .clone()
            .oneshot(
                Request::get(format!("/go/{}", product.product_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()["location"].to_str().unwrap(),
            product.affiliate_url
        );
        let record = store.posted_record(&product.product_id).await.unwrap().unwrap();
        assert_eq!(record.clicks, 1);

        let missing = app
            .oneshot(Request::get("/go/404").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
