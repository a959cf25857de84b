use std::collections::HashSet;
use std::{fmt::Debug, hash::Hash};

use futures::{stream, Stream, TryStreamExt};
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;

use super::{ChangeEvent, ChangeKind};
use crate::error::FeedError;
use crate::store::Canonical;

/// Watches objects of type `K`, keeping a local cache of them.
///
/// Returns the cache reader together with the stream of change notifications.
/// The cache is only updated while the stream is polled.
pub fn objects<K>(
    api: Api<K>,
    watcher_config: watcher::Config,
) -> (
    Store<K>,
    impl Stream<Item = Result<ChangeEvent, FeedError>> + Send,
)
where
    K: 'static + Debug + Clone + DeserializeOwned + Send + Sync + Resource + Canonical,
    K::DynamicType: Clone + Eq + Hash + Default + Send + Sync,
{
    with(api, watcher_config, <_>::default())
}

/// Like [`objects`], for resources whose type is only known at runtime.
pub fn with<K>(
    api: Api<K>,
    watcher_config: watcher::Config,
    dyntype: K::DynamicType,
) -> (
    Store<K>,
    impl Stream<Item = Result<ChangeEvent, FeedError>> + Send,
)
where
    K: 'static + Debug + Clone + DeserializeOwned + Send + Sync + Resource + Canonical,
    K::DynamicType: Clone + Eq + Hash + Send + Sync,
{
    let mut writer = reflector::store::Writer::new(dyntype.clone());
    let store = writer.as_reader();
    let cache = store.clone();

    let events = watcher(api, watcher_config)
        .default_backoff()
        .map_err(FeedError::Watch)
        .map_ok(move |event| {
            // Classify against the cache before the event is applied to it.
            let changes = classify(&cache, &dyntype, &event);
            writer.apply_watcher_event(&event);
            stream::iter(changes)
        })
        .try_flatten();

    (store, events)
}

fn classify<K>(
    cache: &Store<K>,
    dyntype: &K::DynamicType,
    event: &watcher::Event<K>,
) -> Vec<Result<ChangeEvent, FeedError>>
where
    K: 'static + Clone + Resource + Canonical,
    K::DynamicType: Clone + Eq + Hash,
{
    let change_of = |obj: &K| {
        if cache.get(&ObjectRef::from_obj_with(obj, dyntype.clone())).is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Added
        }
    };
    let notify = |change: ChangeKind, obj: &K| {
        obj.canonical()
            .map(|object| ChangeEvent::new(change, object))
            .map_err(FeedError::Malformed)
    };

    match event {
        watcher::Event::Applied(obj) => vec![notify(change_of(obj), obj)],
        watcher::Event::Deleted(obj) => vec![notify(ChangeKind::Deleted, obj)],
        watcher::Event::Restarted(objs) => {
            let listed: HashSet<_> = objs
                .iter()
                .map(|obj| ObjectRef::from_obj_with(obj, dyntype.clone()))
                .collect();
            let vanished = cache.state().into_iter().filter(|obj| {
                !listed.contains(&ObjectRef::from_obj_with(obj.as_ref(), dyntype.clone()))
            });

            objs.iter()
                .map(|obj| notify(change_of(obj), obj))
                .chain(vanished.map(|obj| notify(ChangeKind::Deleted, obj.as_ref())))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod as KubePod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::subscriber::{ObjectKey, ObjectKind};

    fn pod(name: &str) -> KubePod {
        KubePod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                ..ObjectMeta::default()
            },
            ..KubePod::default()
        }
    }

    fn changes(events: Vec<Result<ChangeEvent, FeedError>>) -> Vec<(ChangeKind, String)> {
        events
            .into_iter()
            .map(|event| {
                let event = event.unwrap();
                assert_eq!(event.kind(), ObjectKind::Pod);
                (event.change, event.key().name.clone())
            })
            .collect()
    }

    #[test]
    fn applied_is_added_then_updated() {
        let mut writer = reflector::store::Writer::<KubePod>::default();
        let cache = writer.as_reader();

        let event = watcher::Event::Applied(pod("p1"));
        assert_eq!(
            changes(classify(&cache, &(), &event)),
            [(ChangeKind::Added, "p1".to_owned())]
        );
        writer.apply_watcher_event(&event);

        assert_eq!(
            changes(classify(&cache, &(), &event)),
            [(ChangeKind::Updated, "p1".to_owned())]
        );
    }

    #[test]
    fn deleted_carries_the_object_key() {
        let cache = reflector::store::Writer::<KubePod>::default().as_reader();
        let events = classify(&cache, &(), &watcher::Event::Deleted(pod("p1")));
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.change, ChangeKind::Deleted);
        assert_eq!(event.key(), &ObjectKey::new("ns", "p1"));
    }

    #[test]
    fn restart_reports_vanished_objects_as_deleted() {
        let mut writer = reflector::store::Writer::<KubePod>::default();
        let cache = writer.as_reader();
        writer.apply_watcher_event(&watcher::Event::Restarted(vec![pod("kept"), pod("gone")]));

        let relist = watcher::Event::Restarted(vec![pod("kept"), pod("new")]);
        let mut got = changes(classify(&cache, &(), &relist));
        got.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            got,
            [
                (ChangeKind::Deleted, "gone".to_owned()),
                (ChangeKind::Updated, "kept".to_owned()),
                (ChangeKind::Added, "new".to_owned()),
            ]
        );
    }

    #[test]
    fn unnamespaced_object_is_malformed() {
        let cache = reflector::store::Writer::<KubePod>::default().as_reader();
        let mut orphan = pod("p1");
        orphan.metadata.namespace = None;
        let events = classify(&cache, &(), &watcher::Event::Applied(orphan));
        assert!(matches!(events.as_slice(), [Err(FeedError::Malformed(_))]));
    }
}
