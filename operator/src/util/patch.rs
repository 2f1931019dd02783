use kube::{
    Api, Client, Resource,
    api::{ObjectMeta, PostParams},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

use super::Error;

/// Applies `f` to a clone of `instance` and writes the result back with
/// `replace_status`, which round-trips the object's `resourceVersion` and
/// so gives the server-side optimistic-concurrency check spec.md §4.3/§5
/// describes: the write fails with a 409 if another writer raced ahead.
///
/// Callers map a 409 (`Error::is_conflict`) to a short requeue rather than
/// retrying in a loop here — the framework redelivers the event.
pub async fn update_status<T>(
    client: Client,
    namespace: &str,
    instance: &T,
    f: impl FnOnce(&mut T),
) -> Result<T, Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    let mut modified = instance.clone();
    f(&mut modified);
    let name = object_name(&modified)?;
    let api: Api<T> = Api::namespaced(client, namespace);
    api.replace_status(
        &name,
        &PostParams::default(),
        serde_json::to_vec(&modified)?,
    )
    .await
    .map_err(Error::from)
}

/// Ensures `instance.metadata.labels[key] = value`, patching only if the
/// label is absent or differs. Uses the same CAS-via-resourceVersion write.
pub async fn ensure_label<T>(
    client: Client,
    namespace: &str,
    instance: &T,
    key: &str,
    value: &str,
) -> Result<T, Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    if instance.meta().labels.as_ref().and_then(|l| l.get(key)).map(String::as_str) == Some(value)
    {
        return Ok(instance.clone());
    }
    let mut modified = instance.clone();
    let meta: &mut ObjectMeta = modified.meta_mut();
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    let name = object_name(&modified)?;
    let api: Api<T> = Api::namespaced(client, namespace);
    api.replace(&name, &PostParams::default(), &modified)
        .await
        .map_err(Error::from)
}

fn object_name<T: Resource>(instance: &T) -> Result<String, Error> {
    instance
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::MissingField("metadata.name".to_string()))
}
