//! Maintenance lease.
//!
//! A single named coordination Lease elects one reaper across executor
//! replicas. The decision logic is pure so the election predicate can be
//! tested without a cluster: if two replicas evaluate a valid current
//! holder simultaneously, exactly one of them wins.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, warn};

use super::is_conflict;

/// Name of the cluster-wide maintenance lease.
pub const LEASE_NAME: &str = "executor-maintenance-lock";
/// Seconds a holder's renewal stays valid.
pub const LEASE_DURATION_SECONDS: i32 = 30;

/// What to do with the currently observed lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We already hold it; refresh `renewTime`.
    Renew,
    /// The holder's renewal expired; take it over.
    Steal,
    /// Someone else holds a valid lease.
    Hold,
}

/// Decide against an existing lease.
pub fn lease_decision(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());

    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }

    let duration_secs = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECONDS) as i64;
    let renewed_at = spec.and_then(|s| s.renew_time.as_ref()).map(|t| t.0);

    match renewed_at {
        Some(renewed_at) if (now - renewed_at).num_milliseconds() > duration_secs * 1000 => {
            LeaseDecision::Steal
        }
        // A lease with no renew time was never properly taken; claim it.
        None => LeaseDecision::Steal,
        _ => LeaseDecision::Hold,
    }
}

fn lease_body(identity: &str, acquire_time: MicroTime, renew_time: MicroTime) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        acquire_time: Some(acquire_time),
        renew_time: Some(renew_time),
        lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
        ..Default::default()
    }
}

/// Acquires and renews the maintenance lease for one executor replica.
#[derive(Clone)]
pub struct LeaseManager {
    client: Client,
    namespace: String,
    identity: String,
}

impl LeaseManager {
    pub fn new(client: Client, namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            identity: identity.into(),
        }
    }

    fn leases(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Try to take or keep the lease for this cycle. Returns `true` when
    /// this replica may run the reaper now. Errors are logged and count as
    /// not acquired; the next cycle retries.
    pub async fn try_acquire(&self) -> bool {
        let now = MicroTime(Utc::now());

        let existing = match self.leases().get_opt(LEASE_NAME).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("failed to read maintenance lease: {e}");
                return false;
            }
        };

        match existing {
            None => {
                let lease = Lease {
                    metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                        name: Some(LEASE_NAME.to_string()),
                        ..Default::default()
                    },
                    spec: Some(lease_body(&self.identity, now.clone(), now)),
                };
                match self.leases().create(&PostParams::default(), &lease).await {
                    Ok(_) => true,
                    Err(e) if is_conflict(&e) => false,
                    Err(e) => {
                        warn!("failed to create maintenance lease: {e}");
                        false
                    }
                }
            }
            Some(current) => match lease_decision(&current, &self.identity, Utc::now()) {
                LeaseDecision::Hold => {
                    debug!("maintenance lease held elsewhere, skipping cycle");
                    false
                }
                decision => {
                    let acquire_time = match decision {
                        LeaseDecision::Renew => current
                            .spec
                            .as_ref()
                            .and_then(|s| s.acquire_time.clone())
                            .unwrap_or_else(|| now.clone()),
                        _ => now.clone(),
                    };
                    let mut replacement = current.clone();
                    replacement.spec = Some(lease_body(&self.identity, acquire_time, now));
                    match self
                        .leases()
                        .replace(LEASE_NAME, &PostParams::default(), &replacement)
                        .await
                    {
                        Ok(_) => true,
                        Err(e) => {
                            // A concurrent renew/steal beat us; not ours this cycle.
                            debug!("failed to take maintenance lease: {e}");
                            false
                        }
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lease(holder: &str, renewed_secs_ago: i64, now: DateTime<Utc>) -> Lease {
        Lease {
            metadata: Default::default(),
            spec: Some(LeaseSpec {
                holder_identity: Some(holder.to_string()),
                acquire_time: Some(MicroTime(now - chrono::Duration::seconds(120))),
                renew_time: Some(MicroTime(now - chrono::Duration::seconds(renewed_secs_ago))),
                lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
                ..Default::default()
            }),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn holder_renews() {
        let lease = lease("executor-0-42", 5, now());
        assert_eq!(
            lease_decision(&lease, "executor-0-42", now()),
            LeaseDecision::Renew
        );
    }

    #[test]
    fn valid_foreign_lease_is_held() {
        let lease = lease("executor-1-43", 5, now());
        assert_eq!(
            lease_decision(&lease, "executor-0-42", now()),
            LeaseDecision::Hold
        );
    }

    #[test]
    fn expired_foreign_lease_is_stolen() {
        let lease = lease("executor-1-43", 31, now());
        assert_eq!(
            lease_decision(&lease, "executor-0-42", now()),
            LeaseDecision::Steal
        );
    }

    #[test]
    fn boundary_is_exclusive() {
        // Exactly lease_duration old is still valid.
        let lease = lease("executor-1-43", 30, now());
        assert_eq!(
            lease_decision(&lease, "executor-0-42", now()),
            LeaseDecision::Hold
        );
    }

    #[test]
    fn never_renewed_lease_is_claimed() {
        let mut l = lease("executor-1-43", 5, now());
        l.spec.as_mut().unwrap().renew_time = None;
        assert_eq!(
            lease_decision(&l, "executor-0-42", now()),
            LeaseDecision::Steal
        );
    }
}
