//! Integration tests wiring services through layers and running effects
//! against the resolved context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use millrace::layer::required;
use millrace::{run_promise, run_sync, Context, Effect, Layer, LayerError, Runtime, Tag};

struct Config {
    base_url: String,
}

struct HttpClient {
    endpoint: String,
}

struct UserRepo {
    client: Arc<HttpClient>,
}

#[derive(Debug, PartialEq)]
enum AppError {
    Wiring(LayerError),
}

impl From<LayerError> for AppError {
    fn from(e: LayerError) -> Self {
        AppError::Wiring(e)
    }
}

fn config_tag() -> Tag<Config> {
    Tag::new("Config")
}

#[tokio::test]
async fn a_layered_service_graph_resolves_and_serves_requests() {
    let config: Tag<Config> = Tag::new("Config");
    let client: Tag<HttpClient> = Tag::new("HttpClient");
    let repo: Tag<UserRepo> = Tag::new("UserRepo");

    let config_layer = Layer::succeed(
        config,
        Config {
            base_url: "http://api.test".to_string(),
        },
    );
    let client_layer = Layer::effectful(client, move || {
        required(config).map(|cfg| HttpClient {
            endpoint: format!("{}/v1", cfg.base_url),
        })
    });
    let repo_layer = Layer::effectful(repo, move || {
        required(client).map(|client| UserRepo { client })
    });

    let wired = Layer::merge_all([
        client_layer.clone().provide(config_layer.clone()),
        repo_layer.provide(client_layer.provide(config_layer)),
    ]);

    let runtime = Runtime::from_layer(&wired).await.expect("graph resolves");
    let effect = Effect::<_, String>::service(repo)
        .map(|r| r.client.endpoint.clone());
    assert_eq!(
        runtime.run_promise(effect).await.ok(),
        Some("http://api.test/v1".to_string())
    );
}

#[tokio::test]
async fn a_shared_dependency_is_constructed_once_per_resolution() {
    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    let config: Tag<Config> = Tag::new("Config");
    let client: Tag<HttpClient> = Tag::new("HttpClient");
    let repo: Tag<UserRepo> = Tag::new("UserRepo");

    let config_layer = Layer::effectful(config, move || {
        Effect::sync(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Config {
                base_url: "http://api.test".to_string(),
            }
        })
    });
    let client_layer = Layer::effectful(client, move || {
        required(config).map(|cfg| HttpClient {
            endpoint: cfg.base_url.clone(),
        })
    });
    let repo_layer = Layer::effectful(repo, move || {
        required(client).map(|client| UserRepo { client })
    });

    // Both branches name the same config layer value.
    let wired = Layer::merge_all([
        client_layer.clone().provide(config_layer.clone()),
        repo_layer.provide(client_layer.provide(config_layer)),
    ]);

    assert!(run_promise(wired.build()).await.is_ok());
    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
}

#[test]
fn an_unwired_dependency_fails_resolution_with_the_missing_tag() {
    let client: Tag<HttpClient> = Tag::new("HttpClient");
    let config = config_tag();

    let client_layer = Layer::effectful(client, move || {
        required(config).map(|cfg| HttpClient {
            endpoint: cfg.base_url.clone(),
        })
    });

    let cause = run_sync(client_layer.build()).unwrap_err();
    match cause.failure_option() {
        Some(LayerError::MissingDependency { tag }) => {
            assert!(tag.contains("Config"));
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }
}

#[test]
fn provide_layer_converts_wiring_errors_into_the_effect_channel() {
    let client: Tag<HttpClient> = Tag::new("HttpClient");
    let config = config_tag();

    let client_layer = Layer::effectful(client, move || {
        required(config).map(|cfg| HttpClient {
            endpoint: cfg.base_url.clone(),
        })
    });

    let effect = Effect::<_, AppError>::service(client)
        .map(|c| c.endpoint.clone())
        .provide_layer(client_layer);

    let cause = run_sync(effect).unwrap_err();
    match cause.failure_option() {
        Some(AppError::Wiring(LayerError::MissingDependency { .. })) => {}
        other => panic!("expected wiring failure, got {other:?}"),
    }
}

#[test]
fn provided_context_shadows_the_ambient_entry_and_restores_it() {
    let config = config_tag();
    let outer = Context::empty().add(
        config,
        Config {
            base_url: "outer".to_string(),
        },
    );
    let inner = Context::empty().add(
        config,
        Config {
            base_url: "inner".to_string(),
        },
    );

    let read = move || Effect::<_, String>::service(config).map(|c| c.base_url.clone());
    let effect = read()
        .provide_context(inner)
        .zip(read())
        .provide_context(outer);

    assert_eq!(
        run_sync(effect).ok(),
        Some(("inner".to_string(), "outer".to_string()))
    );
}

#[test]
fn missing_service_without_a_layer_is_a_defect() {
    let config = config_tag();
    let effect = Effect::<_, String>::service(config).map(|c| c.base_url.clone());
    let cause = run_sync(effect).unwrap_err();
    let defect = cause.defect_option().expect("missing service dies");
    assert!(defect.message().contains("Config"));
}
