//! In-memory server of record for sync tests.
//!
//! Applies each batch in submission order with the booking backend's rules:
//! floor plans are version-checked, rooms and bookings are last-write-wins.
//! Responses are built as JSON with integer ids, the way the real server
//! answers, and decoded through the client's wire types.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use floorsync_core::sync::protocol::{BatchSyncRequest, BatchSyncResponse, WireChange};
use floorsync_core::sync::PendingGauge;
use floorsync_core::{
    ChangeQueue, ChangeType, ConflictResolver, ConnectivityMonitor, ObjectKey, ResolutionApplier,
    SyncCoordinator, SyncSettings, SyncTransport, TransportError,
};
use serde_json::{json, Map, Value};

const VERSIONED_MODELS: &[&str] = &["FloorPlan"];

#[derive(Debug, Clone)]
pub struct ServerObject {
    pub version: i64,
    pub fields: Map<String, Value>,
    history: BTreeMap<i64, Map<String, Value>>,
}

impl ServerObject {
    pub fn field(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }
}

struct ServerState {
    objects: BTreeMap<(String, String), ServerObject>,
    next_id: i64,
    echo_client_id: bool,
    report_server_version: bool,
    serve_object_versions: bool,
    reachable: bool,
    delay: Duration,
    scripted_failures: VecDeque<TransportError>,
    batches: Vec<BatchSyncRequest>,
}

#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                objects: BTreeMap::new(),
                next_id: 100,
                echo_client_id: true,
                report_server_version: true,
                serve_object_versions: true,
                reachable: true,
                delay: Duration::ZERO,
                scripted_failures: VecDeque::new(),
                batches: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Store an object as it stands at `version`
    pub fn seed(&self, model: &str, id: &str, version: i64, fields: Value) {
        let fields = as_map(fields);
        let mut history = BTreeMap::new();
        history.insert(version, fields.clone());
        self.state().objects.insert(
            (model.to_string(), id.to_string()),
            ServerObject {
                version,
                fields,
                history,
            },
        );
    }

    /// Apply an edit made by another client, bumping the version
    pub fn edit(&self, model: &str, id: &str, patch: Value) {
        let mut state = self.state();
        let object = state
            .objects
            .get_mut(&(model.to_string(), id.to_string()))
            .expect("seeded object");
        apply_patch(object, &as_map(patch));
    }

    pub fn object(&self, model: &str, id: &str) -> Option<ServerObject> {
        self.state()
            .objects
            .get(&(model.to_string(), id.to_string()))
            .cloned()
    }

    pub fn set_echo_client_id(&self, echo: bool) {
        self.state().echo_client_id = echo;
    }

    pub fn set_report_server_version(&self, report: bool) {
        self.state().report_server_version = report;
    }

    /// Whether object lookups expose a version
    pub fn set_serve_object_versions(&self, serve: bool) {
        self.state().serve_object_versions = serve;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Fail the next batch call with `error`
    pub fn fail_next(&self, error: TransportError) {
        self.state().scripted_failures.push_back(error);
    }

    /// Every batch received, in order
    pub fn batches(&self) -> Vec<BatchSyncRequest> {
        self.state().batches.clone()
    }

    fn process(&self, request: &BatchSyncRequest) -> Value {
        let mut state = self.state();
        state.batches.push(request.clone());

        let mut synced = Vec::new();
        let mut conflicts = Vec::new();
        let mut failed = Vec::new();

        for change in &request.changes {
            let echo_id = state.echo_client_id.then_some(change.client_id).flatten();
            let echo = |object_id: Option<&str>| {
                let mut echoed = json!({
                    "model_name": change.model_name,
                    "object_id": object_id.map(wire_id),
                    "change_type": change.change_type,
                });
                if let Some(client_id) = echo_id {
                    echoed["client_id"] = json!(client_id);
                }
                echoed
            };

            match change.change_type {
                ChangeType::Create => {
                    let id = state.next_id.to_string();
                    state.next_id += 1;
                    let fields = as_map(change.change_data.clone());
                    let mut history = BTreeMap::new();
                    history.insert(1, fields.clone());
                    state.objects.insert(
                        (change.model_name.clone(), id.clone()),
                        ServerObject {
                            version: 1,
                            fields,
                            history,
                        },
                    );
                    synced.push(json!({"change": echo(Some(&id)), "new_id": wire_id(&id)}));
                }
                ChangeType::Update => {
                    let report_version = state.report_server_version;
                    let key = (
                        change.model_name.clone(),
                        change.object_id.clone().unwrap_or_default(),
                    );
                    let Some(object) = state.objects.get_mut(&key) else {
                        failed.push(json!({
                            "change": echo(change.object_id.as_deref()),
                            "error": format!("{} matching query does not exist.", change.model_name),
                        }));
                        continue;
                    };

                    let versioned = VERSIONED_MODELS.contains(&change.model_name.as_str());
                    if versioned && change.version_at_change != object.version {
                        let field_conflicts = field_conflicts(object, change);
                        if !field_conflicts.is_empty() {
                            let mut entry = json!({
                                "change": echo(change.object_id.as_deref()),
                                "conflicts": field_conflicts,
                            });
                            if report_version {
                                entry["server_version"] = json!(object.version);
                            }
                            conflicts.push(entry);
                            continue;
                        }
                    }

                    apply_patch(object, &as_map(change.change_data.clone()));
                    synced.push(json!({"change": echo(change.object_id.as_deref())}));
                }
                ChangeType::Delete => {
                    let key = (
                        change.model_name.clone(),
                        change.object_id.clone().unwrap_or_default(),
                    );
                    state.objects.remove(&key);
                    synced.push(json!({"change": echo(change.object_id.as_deref())}));
                }
            }
        }

        json!({
            "message": format!(
                "Synced {} changes, {} conflicts detected",
                synced.len(),
                conflicts.len()
            ),
            "results": {"synced": synced, "conflicts": conflicts, "failed": failed},
        })
    }
}

impl SyncTransport for FakeServer {
    async fn submit_batch(
        &self,
        request: &BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        let delay = self.state().delay;
        tokio::time::sleep(delay).await;

        let scripted = self.state().scripted_failures.pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        if !self.state().reachable {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }

        let body = self.process(request);
        serde_json::from_value(body)
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(TransportError::Unreachable("connection refused".to_string()))
        }
    }

    async fn current_version(&self, key: &ObjectKey) -> Result<Option<i64>, TransportError> {
        let state = self.state();
        if !state.reachable {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        let model = key.model_name.as_str();
        if !state.serve_object_versions || !VERSIONED_MODELS.contains(&model) {
            return Ok(None);
        }
        Ok(key.object_id.as_ref().and_then(|id| {
            state
                .objects
                .get(&(model.to_string(), id.clone()))
                .map(|object| object.version)
        }))
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Integer ids go over the wire as numbers, like the real server sends them
fn wire_id(id: &str) -> Value {
    id.parse::<i64>().map_or_else(|_| json!(id), |id| json!(id))
}

fn apply_patch(object: &mut ServerObject, patch: &Map<String, Value>) {
    for (field, value) in patch {
        object.fields.insert(field.clone(), value.clone());
    }
    object.version += 1;
    object.history.insert(object.version, object.fields.clone());
}

fn field_conflicts(object: &ServerObject, change: &WireChange) -> Vec<Value> {
    let base = object.history.get(&change.version_at_change);
    as_map(change.change_data.clone())
        .into_iter()
        .filter(|(field, yours)| object.fields.get(field) != Some(yours))
        .map(|(field, yours)| {
            json!({
                "field": field,
                "yours": yours,
                "theirs": object.field(&field),
                "base": base.and_then(|fields| fields.get(&field)).cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

/// A client wired to a fake server
pub struct Client {
    pub queue: ChangeQueue,
    pub monitor: ConnectivityMonitor,
    pub resolver: ConflictResolver,
    pub coordinator: SyncCoordinator<FakeServer>,
    pub server: FakeServer,
}

impl Client {
    pub fn new(server: &FakeServer) -> Self {
        Self::with_queue(server, ChangeQueue::open_in_memory().unwrap(), &SyncSettings::default())
    }

    pub fn with_settings(server: &FakeServer, settings: &SyncSettings) -> Self {
        Self::with_queue(server, ChangeQueue::open_in_memory().unwrap(), settings)
    }

    pub fn with_queue(server: &FakeServer, queue: ChangeQueue, settings: &SyncSettings) -> Self {
        let monitor = ConnectivityMonitor::new(queue.pending_gauge());
        let resolver =
            ConflictResolver::new(ResolutionApplier::new(queue.clone(), monitor.clone()));
        let coordinator = SyncCoordinator::new(
            server.clone(),
            queue.clone(),
            monitor.clone(),
            resolver.clone(),
            settings,
        );
        Self {
            queue,
            monitor,
            resolver,
            coordinator,
            server: server.clone(),
        }
    }

    pub fn gauge(&self) -> PendingGauge {
        self.queue.pending_gauge()
    }
}
