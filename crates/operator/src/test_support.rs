//! In-memory [`ClusterClient`] for unit and integration tests.
//!
//! Objects are stored as JSON keyed by (kind, namespace, name). Every call is counted per
//! operation and kind so tests can assert which writes happened, and failures can be
//! injected per operation. Deletion honours finalizers the way the API server does: an
//! object with finalizers only gets a deletion timestamp, and dropping the last finalizer
//! of a terminating object removes it. Metadata JSON patches are applied atomically,
//! `test` operations included.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use kube::error::ErrorResponse;
use serde_json::{json, Value};

use crate::client::{ClusterClient, ClusterObject, DeleteOutcome, WatchEvent, WatchStream};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op { Get, List, Write, Delete, Metadata, Status }

type ObjectKey = (String, String, String);

#[derive(Clone)]
enum Scripted { Applied(Value), Deleted(Value), Restarted(Vec<Value>), Error }

type Edit = Box<dyn FnOnce(&mut Value) + Send>;

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    calls: HashMap<(Op, String), usize>,
    failures: HashMap<(Op, String), usize>,
    watches: HashMap<String, Vec<Scripted>>,
    after_get: HashMap<ObjectKey, Edit>,
    next_uid: u64,
}

/// API error the way the server would report it.
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("injected {reason}"), reason: reason.into(), code }))
}

#[derive(Default)]
pub struct FakeClusterClient { state: Mutex<FakeState> }

fn kind_of<K: ClusterObject>() -> String { K::kind(&()).into_owned() }

fn to_value<K: ClusterObject>(obj: &K) -> Value { serde_json::to_value(obj).expect("cluster objects serialize") }

fn from_value<K: ClusterObject>(v: &Value) -> K { serde_json::from_value(v.clone()).expect("stored objects deserialize") }

fn meta_str(v: &Value, field: &str) -> Option<String> { v["metadata"][field].as_str().map(String::from) }

fn has_finalizers(v: &Value) -> bool { v["metadata"]["finalizers"].as_array().map_or(false, |f| !f.is_empty()) }

impl FakeClusterClient {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, FakeState> { self.state.lock().unwrap_or_else(|e| e.into_inner()) }

    /// Stores `obj` as an external actor would: a new object gets a UID and generation 1,
    /// an existing one keeps its UID and status and bumps its generation.
    pub fn insert<K: ClusterObject>(&self, obj: K) {
        let mut v = to_value(&obj);
        let namespace = meta_str(&v, "namespace").unwrap_or_else(|| "default".into());
        let name = meta_str(&v, "name").expect("object has a name");
        let key = (kind_of::<K>(), namespace.clone(), name);
        let mut st = self.lock();
        let existing = st.objects.get(&key)
            .map(|old| (meta_str(old, "uid"), old["metadata"]["generation"].as_i64().unwrap_or(0) + 1, old.get("status").cloned()));
        let (uid, generation, status) = match existing {
            Some(found) => found,
            None => { st.next_uid += 1; (None, 1, None) }
        };
        let uid = uid.or_else(|| meta_str(&v, "uid")).unwrap_or_else(|| format!("uid-{}", st.next_uid));
        v["metadata"]["namespace"] = json!(namespace);
        v["metadata"]["uid"] = json!(uid);
        v["metadata"]["generation"] = json!(generation);
        let has_status = v.get("status").map_or(false, |s| !s.is_null());
        if let (Some(status), false) = (status, has_status) { v["status"] = status; }
        st.objects.insert(key, v);
    }

    /// Current state of an object, without counting a call.
    pub fn object<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock().objects.get(&(kind_of::<K>(), namespace.into(), name.into())).map(from_value)
    }

    pub fn objects<K: ClusterObject>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        self.lock().objects.iter().filter(|((k, _, _), _)| *k == kind).map(|(_, v)| from_value(v)).collect()
    }

    /// Mutates a stored object in place, as an out-of-band edit would.
    pub fn edit<K: ClusterObject>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let mut st = self.lock();
        if let Some(v) = st.objects.get_mut(&key) {
            let mut obj: K = from_value(v);
            f(&mut obj);
            *v = to_value(&obj);
        }
    }

    /// Edits the object right after the next `get` of it has been answered, as another
    /// writer racing with the caller would.
    pub fn edit_after_next_get<K: ClusterObject>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K) + Send + 'static) {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let edit: Edit = Box::new(move |v| {
            let mut obj: K = from_value(v);
            f(&mut obj);
            *v = to_value(&obj);
        });
        self.lock().after_get.insert(key, edit);
    }

    pub fn calls<K: ClusterObject>(&self, op: Op) -> usize {
        self.lock().calls.get(&(op, kind_of::<K>())).copied().unwrap_or(0)
    }

    pub fn writes<K: ClusterObject>(&self) -> usize { self.calls::<K>(Op::Write) }

    pub fn deletes<K: ClusterObject>(&self) -> usize { self.calls::<K>(Op::Delete) }

    pub fn reset_calls(&self) { self.lock().calls.clear(); }

    /// The next `times` calls of `op` on kind `K` fail with a 503.
    pub fn fail_next<K: ClusterObject>(&self, op: Op, times: usize) {
        *self.lock().failures.entry((op, kind_of::<K>())).or_insert(0) += times;
    }

    /// Events replayed by the next `watch::<K>` call, after which the stream stays open.
    pub fn script_watch<K: ClusterObject>(&self, events: Vec<WatchEvent<K>>) {
        let scripted = events.into_iter().map(|ev| match ev {
            WatchEvent::Applied(o) => Scripted::Applied(to_value(&o)),
            WatchEvent::Deleted(o) => Scripted::Deleted(to_value(&o)),
            WatchEvent::Restarted(objs) => Scripted::Restarted(objs.iter().map(to_value).collect()),
        });
        self.lock().watches.entry(kind_of::<K>()).or_default().extend(scripted);
    }

    /// Appends a watch error, as a dropped connection would produce.
    pub fn script_watch_error<K: ClusterObject>(&self) {
        self.lock().watches.entry(kind_of::<K>()).or_default().push(Scripted::Error);
    }

    fn begin<K: ClusterObject>(&self, op: Op) -> Result<MutexGuard<'_, FakeState>> {
        let mut st = self.lock();
        let key = (op, kind_of::<K>());
        *st.calls.entry(key.clone()).or_insert(0) += 1;
        if let Some(left) = st.failures.get_mut(&key).filter(|n| **n > 0) {
            *left -= 1;
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(st)
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let mut st = self.begin::<K>(Op::Get)?;
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let found = st.objects.get(&key).map(from_value);
        if let Some(edit) = st.after_get.remove(&key) {
            if let Some(v) = st.objects.get_mut(&key) { edit(v); }
        }
        Ok(found)
    }

    async fn list<K: ClusterObject>(&self) -> Result<Vec<K>> {
        let st = self.begin::<K>(Op::List)?;
        let kind = kind_of::<K>();
        Ok(st.objects.iter().filter(|((k, _, _), _)| *k == kind).map(|(_, v)| from_value(v)).collect())
    }

    async fn create_or_replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let mut st = self.begin::<K>(Op::Write)?;
        let mut v = to_value(object);
        let name = meta_str(&v, "name").ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let key = (kind_of::<K>(), namespace.to_string(), name);
        let uid = match st.objects.get(&key).and_then(|old| meta_str(old, "uid")) {
            Some(uid) => uid,
            None => { st.next_uid += 1; format!("uid-{}", st.next_uid) }
        };
        v["metadata"]["namespace"] = json!(namespace);
        v["metadata"]["uid"] = json!(uid);
        st.objects.insert(key, v.clone());
        Ok(from_value(&v))
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        let mut st = self.begin::<K>(Op::Delete)?;
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let Some(v) = st.objects.get_mut(&key) else { return Ok(DeleteOutcome::Absent) };
        if has_finalizers(v) {
            if v["metadata"]["deletionTimestamp"].is_null() { v["metadata"]["deletionTimestamp"] = json!(chrono::Utc::now().to_rfc3339()); }
        } else {
            st.objects.remove(&key);
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn patch_metadata<K: ClusterObject>(&self, namespace: &str, name: &str, patch: json_patch::Patch) -> Result<()> {
        let mut st = self.begin::<K>(Op::Metadata)?;
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let stored = st.objects.get(&key).ok_or_else(|| api_error(404, "NotFound"))?;
        // The API server treats an unset list as null for `test`.
        let mut candidate = stored.clone();
        if candidate["metadata"].get("finalizers").is_none() { candidate["metadata"]["finalizers"] = Value::Null; }
        json_patch::patch(&mut candidate, &patch.0).map_err(|e| api_error(422, &format!("Invalid: {e}")))?;
        if candidate["metadata"]["finalizers"].is_null() {
            if let Some(meta) = candidate["metadata"].as_object_mut() { meta.remove("finalizers"); }
        }
        if !has_finalizers(&candidate) && !candidate["metadata"]["deletionTimestamp"].is_null() {
            st.objects.remove(&key);
        } else {
            st.objects.insert(key, candidate);
        }
        Ok(())
    }

    async fn patch_status<K: ClusterObject>(&self, namespace: &str, name: &str, status: Value) -> Result<()> {
        let mut st = self.begin::<K>(Op::Status)?;
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let v = st.objects.get_mut(&key).ok_or_else(|| api_error(404, "NotFound"))?;
        if !v["status"].is_object() { v["status"] = json!({}); }
        if let (Some(current), Some(patch)) = (v["status"].as_object_mut(), status.as_object()) {
            for (field, value) in patch { current.insert(field.clone(), value.clone()); }
        }
        Ok(())
    }

    fn watch<K: ClusterObject>(&self, _label_selector: Option<&str>) -> WatchStream<K> {
        let scripted = self.lock().watches.remove(&kind_of::<K>()).unwrap_or_default();
        let events: Vec<Result<WatchEvent<K>>> = scripted.into_iter().map(|s| match s {
            Scripted::Applied(v) => Ok(WatchEvent::Applied(from_value(&v))),
            Scripted::Deleted(v) => Ok(WatchEvent::Deleted(from_value(&v))),
            Scripted::Restarted(vs) => Ok(WatchEvent::Restarted(vs.iter().map(from_value).collect())),
            Scripted::Error => Err(api_error(500, "WatchDisconnected")),
        }).collect();
        stream::iter(events).chain(stream::pending()).boxed()
    }
}
