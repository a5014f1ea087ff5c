//! Thread-safe view of the current fleet.
//!
//! `ApplicationStatuses` owns the endpoint lifecycle: it mints endpoints as
//! (host, application) pairs appear, retires them as machines leave, and
//! keeps the active store generation in lockstep with the per-endpoint
//! active flags.
//!
//! Two locks with a fixed order. `status_change_lock` is the rarely held
//! outer lock, taken only while reconciling the fleet; it serializes
//! reconfigurations and covers the window in which the store generation is
//! rebuilt. `lock` is the everyday inner lock over the maps and status
//! records; it is the last lock in the process-wide order, after the page
//! queue and the series locks, so nothing store-related may be called while
//! holding it. Readers take only `lock` and always observe an active-flag
//! set and store pointer that belong together, because both are updated in
//! one critical section of `lock` at the end of a reconfiguration.

use crate::domain::entities::{ApplicationStatus, Endpoint, Machine, PollState, PollStatus};
use crate::registry::application_list::ApplicationList;
use crate::store::Store;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct Inner {
    by_endpoint: HashMap<Endpoint, ApplicationStatus>,
    by_host_port: HashMap<(String, u16), Endpoint>,
    current_store: Arc<Store>,
}

/// The registry of everything the collector is polling.
pub struct ApplicationStatuses {
    app_list: ApplicationList,
    /// Held across active-set reconciliation so the store generation and
    /// the active flags cannot diverge. Always taken before `inner`.
    status_change_lock: Mutex<()>,
    inner: Mutex<Inner>,
}

impl ApplicationStatuses {
    /// Create a registry over a freshly initialized store.
    ///
    /// The registry replaces the store generation on every fleet change, so
    /// callers should drop their own reference to `store` and use
    /// [`ApplicationStatuses::store`] from then on.
    pub fn new(app_list: ApplicationList, store: Store) -> Self {
        Self {
            app_list,
            status_change_lock: Mutex::new(()),
            inner: Mutex::new(Inner {
                by_endpoint: HashMap::new(),
                by_host_port: HashMap::new(),
                current_store: Arc::new(store),
            }),
        }
    }

    /// The application list this registry was built with.
    pub fn application_list(&self) -> &ApplicationList {
        &self.app_list
    }

    /// The current store generation.
    pub fn store(&self) -> Arc<Store> {
        self.inner.lock().current_store.clone()
    }

    /// Record a poll state transition for `endpoint`. A transition into
    /// [`PollStatus::Synced`] also refreshes the read bookkeeping.
    ///
    /// # Panics
    ///
    /// Panics when this registry never issued `endpoint`; pollers must use
    /// endpoints obtained from [`ApplicationStatuses::active_endpoint_ids`].
    pub fn update(&self, endpoint: &Endpoint, state: &PollState) {
        let mut inner = self.inner.lock();
        let status = known_mut(&mut inner.by_endpoint, endpoint, "update");
        status.status = state.status;
        if state.status == PollStatus::Synced {
            status.last_read_time = Some(state.timestamp);
            status.poll_duration = Some(state.poll_duration);
            status.initial_metric_count = state.metric_count;
        }
    }

    /// Record or clear the poll layer's error for `endpoint`. `ts` is when
    /// the error occurred, or when it cleared for `error == None`.
    ///
    /// # Panics
    ///
    /// Panics when this registry never issued `endpoint`.
    pub fn report_error(&self, endpoint: &Endpoint, error: Option<String>, ts: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let status = known_mut(&mut inner.by_endpoint, endpoint, "report_error");
        match error {
            Some(message) => {
                if !status.down {
                    tracing::warn!(endpoint = %endpoint, error = %message, "endpoint is down");
                }
                status.last_error = Some(message);
                status.last_error_time = Some(ts);
                status.down = true;
            }
            None => {
                if status.down {
                    tracing::info!(endpoint = %endpoint, "endpoint recovered");
                }
                status.last_error = None;
                status.last_error_time = None;
                status.down = false;
            }
        }
    }

    /// Record how many metrics changed in one completed poll cycle.
    ///
    /// # Panics
    ///
    /// Panics when this registry never issued `endpoint`.
    pub fn log_changed_metric_count(&self, endpoint: &Endpoint, count: usize) {
        let mut inner = self.inner.lock();
        let status = known_mut(&mut inner.by_endpoint, endpoint, "log_changed_metric_count");
        status.changed_metrics_sum += count as u64;
        status.changed_metrics_count += 1;
    }

    /// Reconcile the registry against the full current fleet.
    ///
    /// Every (machine, application) pair becomes or stays active; every
    /// endpoint absent from the cross product goes inactive, and its series
    /// are terminated in the store at `timestamp` (seconds since the Unix
    /// epoch). The store generation is rebuilt and swapped in atomically
    /// with the active-flag changes, so queries never see the two disagree.
    pub fn mark_hosts_active_exclusively(&self, timestamp: f64, machines: &[Machine]) {
        let _reconfig = self.status_change_lock.lock();

        let mut desired: HashMap<(String, u16), (String, Option<String>)> = HashMap::new();
        for machine in machines {
            for app in self.app_list.all() {
                desired.insert(
                    (machine.hostname.clone(), app.port()),
                    (app.name().to_string(), machine.instance_id.clone()),
                );
            }
        }

        // First pass over the maps: find what must change. No store calls
        // happen under `inner`.
        let (to_create, to_deactivate, to_reactivate, store) = {
            let inner = self.inner.lock();
            let desired_keys: HashSet<&(String, u16)> = desired.keys().collect();

            let mut to_create = Vec::new();
            for (key, (app_name, instance_id)) in &desired {
                if !inner.by_host_port.contains_key(key) {
                    let endpoint = Endpoint::new(key.0.clone(), key.1);
                    to_create.push((
                        key.clone(),
                        endpoint,
                        app_name.clone(),
                        instance_id.clone(),
                    ));
                }
            }

            let mut to_deactivate = Vec::new();
            let mut to_reactivate = Vec::new();
            for (key, endpoint) in &inner.by_host_port {
                let is_desired = desired_keys.contains(key);
                let is_active = inner.by_endpoint[endpoint].active;
                if is_active && !is_desired {
                    to_deactivate.push(endpoint.clone());
                } else if !is_active && is_desired {
                    to_reactivate.push(endpoint.clone());
                }
            }

            (to_create, to_deactivate, to_reactivate, inner.current_store.clone())
        };

        if to_create.is_empty() && to_deactivate.is_empty() && to_reactivate.is_empty() {
            return;
        }

        // Build the next store generation. Terminating series takes series
        // locks, which is why `inner` is not held here; the shards are
        // shared with the current generation, so the termination markers
        // are visible through both.
        let next = store.next_generation();
        for endpoint in &to_deactivate {
            next.mark_endpoint_inactive(timestamp, endpoint);
        }
        for endpoint in &to_reactivate {
            next.mark_endpoint_active(endpoint);
        }
        for (_, endpoint, _, _) in &to_create {
            next.register_endpoint(endpoint);
        }

        // Second pass: flip the flags and swap the store in one critical
        // section, so any reader holding `inner` sees a matching pair.
        {
            let mut inner = self.inner.lock();
            for (key, endpoint, app_name, instance_id) in to_create.iter().cloned() {
                inner.by_host_port.insert(key, endpoint.clone());
                inner.by_endpoint.insert(
                    endpoint.clone(),
                    ApplicationStatus::new(endpoint, app_name, instance_id),
                );
            }
            for endpoint in &to_deactivate {
                if let Some(status) = inner.by_endpoint.get_mut(endpoint) {
                    status.active = false;
                }
            }
            for endpoint in &to_reactivate {
                if let Some(status) = inner.by_endpoint.get_mut(endpoint) {
                    status.active = true;
                    if let Some((_, instance_id)) =
                        desired.get(&(endpoint.host().to_string(), endpoint.port()))
                    {
                        status.instance_id = instance_id.clone();
                    }
                }
            }
            inner.current_store = Arc::new(next);
        }

        tracing::info!(
            machines = machines.len(),
            born = to_create.len(),
            retired = to_deactivate.len(),
            returned = to_reactivate.len(),
            "fleet reconciled"
        );
    }

    /// Snapshot of every status. Callers are free to reorder the result.
    pub fn all(&self) -> Vec<ApplicationStatus> {
        self.inner.lock().by_endpoint.values().cloned().collect()
    }

    /// Snapshot of every status plus the store generation it belongs to.
    pub fn all_with_store(&self) -> (Vec<ApplicationStatus>, Arc<Store>) {
        self.filtered_with_store(|_| true)
    }

    /// Like [`ApplicationStatuses::all_with_store`], restricted to active
    /// endpoints.
    pub fn all_active_with_store(&self) -> (Vec<ApplicationStatus>, Arc<Store>) {
        self.filtered_with_store(|s| s.active)
    }

    fn filtered_with_store(
        &self,
        keep: impl Fn(&ApplicationStatus) -> bool,
    ) -> (Vec<ApplicationStatus>, Arc<Store>) {
        let inner = self.inner.lock();
        let statuses = inner
            .by_endpoint
            .values()
            .filter(|s| keep(s))
            .cloned()
            .collect();
        (statuses, inner.current_store.clone())
    }

    /// Snapshot of one endpoint's status, or None for a stranger.
    pub fn by_endpoint_id(&self, endpoint: &Endpoint) -> Option<ApplicationStatus> {
        self.inner.lock().by_endpoint.get(endpoint).cloned()
    }

    /// Every endpoint eligible for polling, plus the store to write into.
    /// Pollers re-fetch this after each cycle to pick up fleet changes.
    pub fn active_endpoint_ids(&self) -> (Vec<Endpoint>, Arc<Store>) {
        let inner = self.inner.lock();
        let endpoints = inner
            .by_endpoint
            .values()
            .filter(|s| s.active)
            .map(|s| s.endpoint.clone())
            .collect();
        (endpoints, inner.current_store.clone())
    }

    /// The endpoint for a (host, application-name) pair, or None when the
    /// combination is unknown, along with the current store.
    pub fn endpoint_id_by_host_and_name(
        &self,
        host: &str,
        name: &str,
    ) -> (Option<Endpoint>, Arc<Store>) {
        let port = self.app_list.by_name(name).map(|app| app.port());
        let inner = self.inner.lock();
        let endpoint = port.and_then(|port| {
            inner
                .by_host_port
                .get(&(host.to_string(), port))
                .cloned()
        });
        (endpoint, inner.current_store.clone())
    }
}

fn known_mut<'a>(
    by_endpoint: &'a mut HashMap<Endpoint, ApplicationStatus>,
    endpoint: &Endpoint,
    op: &str,
) -> &'a mut ApplicationStatus {
    by_endpoint
        .get_mut(endpoint)
        .unwrap_or_else(|| panic!("{op}: endpoint {endpoint} was never issued by this registry"))
}
