//! Cluster-facing boundaries: replica placement and the external
//! collaborators (config directory, auth) the engine talks to but does not
//! implement.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{id::RecordId, schema::TableSchema};

/// One interchangeable host that may execute work or hold a result blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReplicaRef {
    /// `host:port` address of the replica.
    pub addr: String,
}

impl ReplicaRef {
    /// Wrap a `host:port` address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl fmt::Display for ReplicaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// Maps an output identifier to an ordered list of replica hosts.
///
/// Callers attempt each host in sequence; the first success wins.
pub trait ReplicationPolicy: Send + Sync {
    /// Ordered replica list for `key`, most preferred first.
    fn replicas_for(&self, key: &RecordId) -> Vec<ReplicaRef>;
}

/// Rendezvous (highest-random-weight) placement over a static host list.
pub struct RendezvousReplication {
    hosts: Vec<ReplicaRef>,
    replication_factor: usize,
}

impl RendezvousReplication {
    /// Build a policy over `hosts` returning at most `replication_factor`
    /// replicas per key.
    pub fn new(hosts: Vec<ReplicaRef>, replication_factor: usize) -> Self {
        Self {
            hosts,
            replication_factor,
        }
    }

    fn score(host: &ReplicaRef, key: &RecordId) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(host.addr.as_bytes());
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
    }
}

impl ReplicationPolicy for RendezvousReplication {
    fn replicas_for(&self, key: &RecordId) -> Vec<ReplicaRef> {
        let mut scored: Vec<(u64, &ReplicaRef)> = self
            .hosts
            .iter()
            .map(|host| (Self::score(host, key), host))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.replication_factor)
            .map(|(_, host)| host.clone())
            .collect()
    }
}

/// Returns a fixed host list in declaration order, for single-node setups
/// and tests.
pub struct FixedReplication {
    hosts: Vec<ReplicaRef>,
}

impl FixedReplication {
    /// Wrap a fixed host list.
    pub fn new(hosts: Vec<ReplicaRef>) -> Self {
        Self { hosts }
    }
}

impl ReplicationPolicy for FixedReplication {
    fn replicas_for(&self, _key: &RecordId) -> Vec<ReplicaRef> {
        self.hosts.clone()
    }
}

/// Resolved configuration of one table, as served by the config directory.
#[derive(Clone, Debug)]
pub struct TableConfig {
    /// User schema of the table.
    pub schema: TableSchema,
    /// Servers responsible for the table's metadata operations.
    pub servers: Vec<ReplicaRef>,
}

/// Failure to resolve a table through the config directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The directory has no entry for the requested table.
    #[error("unknown table: {namespace}/{table_name}")]
    UnknownTable {
        /// Requested namespace.
        namespace: String,
        /// Requested table name.
        table_name: String,
    },
    /// The directory backend failed.
    #[error("directory backend: {0}")]
    Backend(String),
}

/// External service resolving `(namespace, table)` to schema and server
/// lists. Implemented outside this crate; the engine only consumes it.
#[async_trait]
pub trait ConfigDirectory: Send + Sync {
    /// Resolve the configuration of one table.
    async fn lookup_table(
        &self,
        namespace: &str,
        table_name: &str,
    ) -> Result<TableConfig, DirectoryError>;
}

/// Identity of the session a MapReduce job runs under.
#[derive(Clone, Debug)]
pub struct JobSession {
    /// Tenant the job belongs to.
    pub tenant: String,
}

impl JobSession {
    /// Build a session for `tenant`.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
        }
    }
}

/// Issues the opaque auth token presented to remote executors.
///
/// Token format and signing live with the external auth collaborator.
pub trait TokenSource: Send + Sync {
    /// Token bound to `session`.
    fn issue_token(&self, session: &JobSession) -> String;
}

/// Fixed-token source for tests and trusted single-tenant deployments.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap a pre-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn issue_token(&self, _session: &JobSession) -> String {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<ReplicaRef> {
        vec![
            ReplicaRef::new("node-a:9175"),
            ReplicaRef::new("node-b:9175"),
            ReplicaRef::new("node-c:9175"),
        ]
    }

    #[test]
    fn rendezvous_is_stable_per_key() {
        let policy = RendezvousReplication::new(hosts(), 2);
        let key = RecordId::new([5; crate::id::RECORD_ID_LEN]);
        let first = policy.replicas_for(&key);
        let second = policy.replicas_for(&key);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn rendezvous_spreads_across_keys() {
        let policy = RendezvousReplication::new(hosts(), 1);
        let mut leaders = std::collections::HashSet::new();
        for byte in 0..32u8 {
            let key = RecordId::new([byte; crate::id::RECORD_ID_LEN]);
            leaders.insert(policy.replicas_for(&key)[0].clone());
        }
        // With 32 keys over 3 hosts every host should lead at least once.
        assert_eq!(leaders.len(), 3);
    }

    #[test]
    fn rendezvous_caps_at_host_count() {
        let policy = RendezvousReplication::new(hosts(), 8);
        let key = RecordId::new([1; crate::id::RECORD_ID_LEN]);
        assert_eq!(policy.replicas_for(&key).len(), 3);
    }

    #[test]
    fn fixed_policy_preserves_order() {
        let policy = FixedReplication::new(hosts());
        let key = RecordId::new([1; crate::id::RECORD_ID_LEN]);
        assert_eq!(policy.replicas_for(&key), hosts());
    }
}
