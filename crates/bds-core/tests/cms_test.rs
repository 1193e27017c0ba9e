#![allow(clippy::unwrap_used)]
// CMS content resolution across Local, Remote and Api sources.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bds_api::{ApiClient, GatewaySettings, HubMultiplexer, WebSocketHubTransport};
use bds_config::Configuration;
use bds_core::ConfigService;
use bds_core::model::{ContentSource, ContentType};
use bds_core::service::{
    CmsOptions, CmsService, LoadedContent, NoBundles, TranslationOptions, TranslationService,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    server: MockServer,
    cms: CmsService,
    dir: TempDir,
}

async fn setup(options: impl FnOnce(&Path, &str) -> CmsOptions) -> Harness {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let configuration = Configuration {
        app_id: "app-42".into(),
        server_url: server.uri(),
        supported_locale: vec!["en".into(), "fr".into()],
        ..Configuration::default()
    };

    let translation = Arc::new(TranslationService::new(
        TranslationOptions::default(),
        Arc::new(NoBundles),
    ));
    translation.init(&configuration).await;
    translation.set_locale(Some("fr")).await;

    let config = Arc::new(ConfigService::new(configuration).unwrap());
    let settings = GatewaySettings::new(&server.uri(), "app-42", "device-7").unwrap();
    let api = Arc::new(ApiClient::from_reqwest(&settings, reqwest::Client::new()).unwrap());
    let hub = HubMultiplexer::builder(
        Arc::new(WebSocketHubTransport::default()),
        Url::parse("http://localhost/hubs/bds").unwrap(),
    )
    .build();

    let cms = CmsService::new(api, config, translation, hub, options(dir.path(), &server.uri()));
    Harness { server, cms, dir }
}

fn local(dir: &Path, _: &str) -> CmsOptions {
    CmsOptions {
        local_path: Some(dir.to_path_buf()),
        default_source: ContentSource::Local,
        ..CmsOptions::default()
    }
}

fn write(dir: &Path, relative: &str, text: &str) {
    let file = dir.join(relative);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, text).unwrap();
}

// ── Local ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_local_content_prefers_current_locale() {
    let h = setup(local).await;
    write(h.dir.path(), "home/fr.title.md", "# Bonjour");
    write(h.dir.path(), "home/en.title.md", "# Hello");
    write(h.dir.path(), "home/en.footer.html", "<p>footer</p>");

    let title = h.cms.content("home", ContentType::Markdown, "title", None).await;
    let footer = h.cms.content("home", ContentType::Html, "footer", None).await;

    assert_eq!(title.as_deref(), Some("# Bonjour"));
    assert_eq!(footer.as_deref(), Some("<p>footer</p>"));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_miss_falls_back_to_api() {
    let h = setup(local).await;
    Mock::given(method("GET"))
        .and(path("/api/cms/v1/content/home/intro"))
        .and(header("filters", "CMS.Content:key|id|value|contentType|order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "from api",
            "contentType": "DEFAULT",
        })))
        .mount(&h.server)
        .await;

    let loaded = h
        .cms
        .load_content("home", Some((ContentType::Default, "intro")), None)
        .await;

    assert_eq!(loaded, Some(LoadedContent::Single("from api".into())));
}

#[tokio::test]
async fn test_miss_everywhere_is_none() {
    let h = setup(local).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    assert_eq!(h.cms.content("home", ContentType::Default, "nothing", None).await, None);
    assert_eq!(h.cms.content("", ContentType::Default, "nothing", None).await, None);
}

#[tokio::test]
async fn test_fallback_can_be_disabled() {
    let h = setup(|dir, uri| CmsOptions {
        fallback_on_api: false,
        ..local(dir, uri)
    })
    .await;

    assert_eq!(h.cms.content("home", ContentType::Default, "intro", None).await, None);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_group_follows_map_order_and_converter() {
    let h = setup(local).await;
    write(
        h.dir.path(),
        "faq/maps.json",
        &json!([
            {"name": "second", "contentType": "DEFAULT", "order": 2},
            {"name": "first", "contentType": "MARKDOWN"},
            {"name": "orphan", "order": 1}
        ])
        .to_string(),
    );
    write(h.dir.path(), "faq/en.second.txt", "two");
    write(h.dir.path(), "faq/fr.first.md", "one");

    let cms = h
        .cms
        .with_converter(Arc::new(|t: ContentType, v: String| format!("{t}:{v}")));
    let group = cms.load_content("faq", None, None).await;

    assert_eq!(
        group,
        Some(LoadedContent::Group(vec!["MARKDOWN:one".into(), "DEFAULT:two".into()]))
    );
}

// ── Api ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_group_loads_contents_by_key_in_order() {
    let h = setup(|_, _| CmsOptions::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/cms/v1/map/news"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"content": {"key": "k2"}, "order": 2},
            {"content": {"key": "k1"}, "order": 1}
        ])))
        .mount(&h.server)
        .await;
    for (key, value) in [("k1", "one"), ("k2", "two")] {
        Mock::given(method("GET"))
            .and(path(format!("/api/cms/v1/content/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": value})))
            .mount(&h.server)
            .await;
    }

    let group = h.cms.group_content("news", None).await;
    let map = h.cms.get_content_map("news", Some(ContentSource::Api)).await.unwrap();

    assert_eq!(group, Some(vec!["one".to_owned(), "two".to_owned()]));
    assert_eq!(map.iter().map(|i| i.order).collect::<Vec<_>>(), [Some(1), Some(2)]);
}

// ── Remote ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_files_are_fetched_per_app_and_locale() {
    let h = setup(|_, uri| CmsOptions {
        remote_path: Some(format!("{uri}/cdn/")),
        default_source: ContentSource::Remote,
        ..CmsOptions::default()
    })
    .await;
    Mock::given(method("GET"))
        .and(path("/cdn/app-42/legal/fr.terms.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>CGU</h1>"))
        .mount(&h.server)
        .await;

    let terms = h.cms.content("legal", ContentType::Html, "terms", None).await;

    assert_eq!(terms.as_deref(), Some("<h1>CGU</h1>"));
    let requests = h.server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.headers.contains_key("authorization")));
}
