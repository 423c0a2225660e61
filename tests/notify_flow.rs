use std::sync::{Arc, Mutex};

use registry_cache::endpoint::{CATEGORY_KEY, VERSION_KEY};
use registry_cache::{
    Backend, CacheLocation, Endpoint, NotifyListener, Registry, RegistryConfig, UrlMatcher,
};

type Calls = Arc<Mutex<Vec<Vec<Endpoint>>>>;

fn registry() -> Registry {
    let config = RegistryConfig {
        cache_file: CacheLocation::Disabled,
        sync_save: true,
        ..RegistryConfig::default()
    };
    Registry::new(registry_url(), config).expect("registry")
}

fn registry_url() -> Endpoint {
    Endpoint::new("zookeeper", "127.0.0.1", 2181, "registry")
}

fn subscription(interface: &str) -> Endpoint {
    Endpoint::new("consumer", "10.0.0.1", 0, interface)
}

fn provider(port: u16) -> Endpoint {
    Endpoint::new("grpc", "10.0.0.9", port, "com.example.Greeter")
}

fn recorder() -> (Arc<dyn NotifyListener>, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let listener: Arc<dyn NotifyListener> =
        Arc::new(move |urls: &[Endpoint]| -> anyhow::Result<()> {
            sink.lock().unwrap().push(urls.to_vec());
            Ok(())
        });
    (listener, calls)
}

#[test]
fn matching_batch_reaches_listener_grouped_by_category() {
    let registry = registry();
    let sub =
        subscription("com.example.Greeter").with_parameter(CATEGORY_KEY, "providers,routers");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    let router = Endpoint::new("route", "0.0.0.0", 0, "com.example.Greeter")
        .with_parameter(CATEGORY_KEY, "routers");
    registry.notify(&[provider(1), provider(2), router.clone()]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], vec![provider(1), provider(2)]);
    assert_eq!(calls[1], vec![router.clone()]);

    let notified = registry.notified();
    let categories = &notified[&sub];
    assert_eq!(categories["providers"], vec![provider(1), provider(2)]);
    assert_eq!(categories["routers"], vec![router]);
}

#[test]
fn each_push_replaces_the_category() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    registry.notify(&[provider(1), provider(2)]);
    registry.notify(&[provider(3)]);

    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(registry.lookup(&sub).unwrap(), vec![provider(3)]);
}

#[test]
fn non_matching_subscription_is_skipped() {
    let registry = registry();
    let (listener, calls) = recorder();
    registry
        .subscribe(&subscription("com.example.Other"), listener)
        .unwrap();

    registry.notify(&[provider(1)]);

    assert!(calls.lock().unwrap().is_empty());
    assert!(registry.notified().is_empty());
}

#[test]
fn batch_is_routed_by_its_first_url_only() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    let other = Endpoint::new("grpc", "10.0.0.9", 1, "com.example.Other");
    registry.notify(&[other, provider(2)]);

    assert!(calls.lock().unwrap().is_empty());
    assert!(registry.notified().get(&sub).is_none());
}

#[test]
fn urls_not_matching_the_subscription_are_dropped() {
    let registry = registry();
    let sub = subscription("com.example.Greeter").with_parameter(VERSION_KEY, "1.0");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, Arc::clone(&listener)).unwrap();

    let current = provider(1).with_parameter(VERSION_KEY, "1.0");
    let newer = provider(2).with_parameter(VERSION_KEY, "2.0");
    registry.notify(&[current.clone(), newer.clone()]);
    registry
        .notify_listener(&sub, &listener, &[current.clone(), newer, provider(3)])
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[vec![current.clone()], vec![current.clone()]]);
    assert_eq!(registry.notified()[&sub]["providers"], vec![current]);
}

struct AnyInterface;

impl UrlMatcher for AnyInterface {
    fn is_match(&self, _subscribe: &Endpoint, candidate: &Endpoint) -> bool {
        candidate.port() != 0
    }
}

#[test]
fn injected_matcher_decides_routing() {
    let config = RegistryConfig {
        cache_file: CacheLocation::Disabled,
        sync_save: true,
        ..RegistryConfig::default()
    };
    let registry = Registry::builder(registry_url())
        .config(config)
        .matcher(Arc::new(AnyInterface))
        .build()
        .unwrap();
    let sub = subscription("com.example.Other");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    registry.notify(&[provider(1), provider(0)]);

    assert_eq!(calls.lock().unwrap().as_slice(), &[vec![provider(1)]]);
}

#[test]
fn empty_batch_is_ignored() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, Arc::clone(&listener)).unwrap();

    registry.notify(&[]);
    registry.notify_listener(&sub, &listener, &[]).unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert!(registry.notified().get(&sub).is_none());
}

#[test]
fn wildcard_subscription_sees_empty_marker() {
    let registry = registry();
    let sub = subscription("*");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, Arc::clone(&listener)).unwrap();

    registry.notify_listener(&sub, &listener, &[]).unwrap();

    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0][0].protocol(), "empty");
        assert_eq!(calls[0][0].service_interface(), "*");
    }
    assert!(registry.lookup(&sub).unwrap().is_empty());
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn failing_listeners_do_not_block_siblings() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let failing: Arc<dyn NotifyListener> = Arc::new(|_: &[Endpoint]| -> anyhow::Result<()> {
        anyhow::bail!("listener rejected update")
    });
    let panicking: Arc<dyn NotifyListener> =
        Arc::new(|_: &[Endpoint]| -> anyhow::Result<()> { panic!("listener exploded") });
    let (listener, calls) = recorder();
    registry.subscribe(&sub, failing).unwrap();
    registry.subscribe(&sub, panicking).unwrap();
    registry.subscribe(&sub, listener).unwrap();

    registry.notify(&[provider(1)]);

    assert_eq!(calls.lock().unwrap().as_slice(), &[vec![provider(1)]]);
}

#[test]
fn listener_error_surfaces_on_direct_notify() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let failing: Arc<dyn NotifyListener> = Arc::new(|_: &[Endpoint]| -> anyhow::Result<()> {
        anyhow::bail!("listener rejected update")
    });
    let err = registry
        .notify_listener(&sub, &failing, &[provider(1)])
        .unwrap_err();
    assert!(matches!(err, registry_cache::Error::Listener(_)));
    assert_eq!(registry.notified()[&sub]["providers"], vec![provider(1)]);
}

#[test]
fn lookup_returns_known_providers_in_delivery_order() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let (listener, _calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    registry.notify(&[provider(20), provider(10)]);

    assert_eq!(registry.lookup(&sub).unwrap(), vec![provider(20), provider(10)]);
}

#[test]
fn lookup_without_backend_push_is_empty() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    assert!(registry.lookup(&sub).unwrap().is_empty());
    assert!(registry.subscribed().contains_key(&sub));
}

struct PushOnSubscribe {
    providers: Vec<Endpoint>,
}

impl Backend for PushOnSubscribe {
    fn subscribe(&self, registry: &Registry, _url: &Endpoint) -> anyhow::Result<()> {
        registry.notify(&self.providers);
        Ok(())
    }
}

#[test]
fn lookup_waits_for_first_push_from_backend() {
    let config = RegistryConfig {
        cache_file: CacheLocation::Disabled,
        ..RegistryConfig::default()
    };
    let registry = Registry::builder(registry_url())
        .config(config)
        .backend(Arc::new(PushOnSubscribe {
            providers: vec![provider(1), provider(2)],
        }))
        .build()
        .unwrap();
    let sub = subscription("com.example.Greeter");

    assert_eq!(registry.lookup(&sub).unwrap(), vec![provider(1), provider(2)]);
    assert_eq!(registry.notified()[&sub]["providers"].len(), 2);

    // Second call is served from the notified lists.
    assert_eq!(registry.lookup(&sub).unwrap(), vec![provider(1), provider(2)]);
    assert_eq!(registry.subscribed()[&sub].len(), 1);
}

#[test]
fn concurrent_pushes_leave_consistent_state() {
    let registry = registry();
    let sub = subscription("com.example.Greeter");
    let (listener, calls) = recorder();
    registry.subscribe(&sub, listener).unwrap();

    let handles: Vec<_> = (1..=8u16)
        .map(|port| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.notify(&[provider(port)]))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(calls.lock().unwrap().len(), 8);
    let latest = registry.lookup(&sub).unwrap();
    assert_eq!(latest.len(), 1);
    assert!((1..=8).contains(&latest[0].port()));
}

#[test]
fn cache_entry_tracks_notified_lists_under_concurrent_pushes() {
    let sub = subscription("com.example.Greeter");
    for _round in 0..50 {
        let registry = registry();
        let (listener, _calls) = recorder();
        registry.subscribe(&sub, listener).unwrap();

        let handles: Vec<_> = (0..8u16)
            .map(|thread| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for push in 0..25u16 {
                        registry.notify(&[provider(1 + thread * 100 + push)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let notified: Vec<String> = registry.notified()[&sub]["providers"]
            .iter()
            .map(Endpoint::to_full_string)
            .collect();
        let cached = registry.cache_properties()[&sub.service_key()].clone();
        assert_eq!(cached, notified.join(" "));
    }
}
