mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::{apps, base_config, response_text};

async fn seed(entry_app: &axum::Router, body: serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/new/single")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = entry_app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn resolve_redirects_to_the_only_link() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134352",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"}
            ]
        }),
    )
    .await;

    let req = Request::builder().uri("/01/09506000134352").body(Body::empty()).unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get("location").unwrap(), "https://brand.example/pip");
    assert!(resp.headers().get("link").is_some());
}

#[tokio::test]
async fn resolve_substitutes_qualifier_templates_into_href() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134352",
            "qualifiers": [{"10": "{0}"}],
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip?lot={0}", "title": "Product page"}
            ]
        }),
    )
    .await;

    let req = Request::builder()
        .uri("/01/09506000134352/10/LOT99")
        .body(Body::empty())
        .unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get("location").unwrap(), "https://brand.example/pip?lot=LOT99");
}

#[tokio::test]
async fn resolve_returns_300_when_multiple_linktypes_and_none_requested() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134353",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"},
                {"linktype": "gs1:sheet", "href": "https://brand.example/sheet", "title": "Safety data sheet"}
            ]
        }),
    )
    .await;

    let req = Request::builder().uri("/01/09506000134353").body(Body::empty()).unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTIPLE_CHOICES);
    let (_, body) = response_text(resp).await;
    assert!(body.contains("gs1:sheet") || body.contains("sheet"));
}

#[tokio::test]
async fn resolve_wildcard_linktype_collapses_into_linkset_branch() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134399",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"},
                {"linktype": "gs1:sheet", "href": "https://brand.example/sheet", "title": "Safety data sheet"}
            ]
        }),
    )
    .await;

    let req = Request::builder()
        .uri("/01/09506000134399?linktype=*")
        .body(Body::empty())
        .unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let (_, body) = response_text(resp).await;
    assert!(body.contains("gs1:pip") && body.contains("gs1:sheet"));
}

#[tokio::test]
async fn resolve_honors_explicit_linktype_query_param() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134354",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"},
                {"linktype": "gs1:sheet", "href": "https://brand.example/sheet", "title": "Safety data sheet"}
            ]
        }),
    )
    .await;

    let req = Request::builder()
        .uri("/01/09506000134354?linktype=gs1:sheet")
        .body(Body::empty())
        .unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get("location").unwrap(), "https://brand.example/sheet");
}

#[tokio::test]
async fn resolve_prefers_exact_language_match_over_prefix_match() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134355",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/en-gb", "title": "UK", "hreflang": ["en-GB"]},
                {"linktype": "gs1:pip", "href": "https://brand.example/en", "title": "Generic English", "hreflang": ["en"]}
            ]
        }),
    )
    .await;

    let req = Request::builder()
        .uri("/01/09506000134355")
        .header("accept-language", "en-GB")
        .body(Body::empty())
        .unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers().get("location").unwrap(), "https://brand.example/en-gb");
}

#[tokio::test]
async fn resolve_returns_404_for_unknown_identifier() {
    let (resolver_app, _data_entry_app) = apps(base_config());
    let req = Request::builder().uri("/01/00000000000000").body(Body::empty()).unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resolve_normalizes_gtin_13_to_14_for_lookup() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134352",
            "links": [
                {"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"}
            ]
        }),
    )
    .await;

    // 13-digit GTIN is zero-padded to 14 before the anchor lookup.
    let req = Request::builder().uri("/01/9506000134352").body(Body::empty()).unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn well_known_reports_supported_primary_keys() {
    let (resolver_app, data_entry_app) = apps(base_config());
    seed(
        &data_entry_app,
        json!({
            "anchor": "/01/09506000134352",
            "links": [{"linktype": "gs1:pip", "href": "https://brand.example/pip", "title": "Product page"}]
        }),
    )
    .await;

    let req = Request::builder().uri("/.well-known/gs1resolver").body(Body::empty()).unwrap();
    let resp = resolver_app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let (_, body) = response_text(resp).await;
    assert!(body.contains("\"01\""));
}
