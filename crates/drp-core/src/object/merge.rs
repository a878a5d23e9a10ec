//! Admission of remote vertices and state computation at arbitrary points
//! of history.

use tracing::{debug, trace};

use super::{DrpObject, ObjectError};
use crate::acl::ObjectAcl;
use crate::collections::ObjectSet;
use crate::crypto::verify_ed25519;
use crate::drp::{CallContext, Drp, QUERY_PREFIX};
use crate::hashgraph::{DrpType, Hash, HashGraphError, Vertex};

impl<D: Drp> DrpObject<D> {
    /// Integrate a batch of remote vertices.
    ///
    /// Known vertices and duplicates are skipped. Vertices that fail
    /// admission are retried while the batch keeps making progress, so a
    /// batch may arrive in any order. Whatever is still unadmitted is
    /// returned as missing; the first element is true when nothing is.
    ///
    /// # Errors
    ///
    /// Per-vertex failures never fail the batch. An error is returned only
    /// if the live projections cannot be recomputed afterwards, which means
    /// the caches are inconsistent.
    pub fn merge(&mut self, vertices: &[Vertex]) -> Result<(bool, Vec<Hash>), ObjectError> {
        let _entered = self.span.clone().entered();

        let mut seen = ObjectSet::new();
        let mut pending: Vec<&Vertex> = vertices
            .iter()
            .filter(|v| !self.hash_graph.contains(&v.hash) && seen.add(v.hash.clone()))
            .collect();

        let mut admitted = Vec::new();
        let failures = loop {
            let mut retry = Vec::new();
            let before = admitted.len();
            for vertex in pending {
                match self.admit(vertex) {
                    Ok(()) => admitted.push(vertex.clone()),
                    Err(err) => retry.push((vertex, err)),
                }
            }
            if retry.is_empty() || admitted.len() == before {
                break retry;
            }
            pending = retry.into_iter().map(|(vertex, _)| vertex).collect();
        };

        let missing: Vec<Hash> = failures
            .into_iter()
            .map(|(vertex, err)| {
                debug!(
                    hash = %vertex.hash,
                    peer = %vertex.peer_id,
                    code = err.code().code(),
                    "vertex not admitted: {err}"
                );
                vertex.hash.clone()
            })
            .collect();

        if !admitted.is_empty() {
            self.refresh_projections()?;
            debug!(admitted = admitted.len(), missing = missing.len(), "merged");
            self.notify("merge", &admitted);
        }
        Ok((missing.is_empty(), missing))
    }

    fn admit(&mut self, vertex: &Vertex) -> Result<(), ObjectError> {
        self.validate_vertex(vertex)?;
        let (mut drp, mut acl) = self.compute_state_at(&vertex.dependencies)?;

        let drp_type = vertex.drp_type().ok_or_else(|| ObjectError::MalformedOperation {
            hash: vertex.hash.clone(),
            reason: "missing drp type".into(),
        })?;
        if drp_type == DrpType::Drp && !acl.can_write(&vertex.peer_id) {
            return Err(ObjectError::PermissionDenied {
                peer: vertex.peer_id.clone(),
                target: vertex.hash.clone(),
            });
        }
        self.verify_signature(vertex, &acl)?;

        let ctx = CallContext {
            caller: &vertex.peer_id,
        };
        let operation = &vertex.operation;
        match drp_type {
            DrpType::Drp => drp.apply(&ctx, &operation.op_type, operation.args())?,
            DrpType::Acl => acl.apply(&ctx, &operation.op_type, operation.args())?,
        }
        let drp_state = drp.snapshot()?;
        let acl_state = acl.snapshot()?;

        self.hash_graph.add_vertex(vertex.clone())?;
        self.drp_states.insert(vertex.hash.clone(), drp_state);
        self.acl_states.insert(vertex.hash.clone(), acl_state);
        self.finality_store
            .initialize_state(&vertex.hash, &acl.query_get_finality_signers());
        trace!(hash = %vertex.hash, "vertex admitted");
        Ok(())
    }

    /// Structural checks that need no state replay.
    ///
    /// # Errors
    ///
    /// Returns the first rule the vertex breaks: content hash, NOP reserved
    /// for the root, non-empty known dependencies, timestamp not before any
    /// dependency and not beyond the configured clock skew.
    pub fn validate_vertex(&self, vertex: &Vertex) -> Result<(), ObjectError> {
        if !vertex.verify_hash().map_err(HashGraphError::from)? {
            return Err(ObjectError::InvalidHash(vertex.hash.clone()));
        }
        let malformed = |reason: &str| ObjectError::MalformedOperation {
            hash: vertex.hash.clone(),
            reason: reason.to_string(),
        };
        if vertex.is_root() || vertex.operation.is_nop() || vertex.drp_type().is_none() {
            return Err(malformed("only the root vertex may carry a NOP"));
        }
        if vertex.operation.op_type.is_empty()
            || vertex.operation.op_type.starts_with(QUERY_PREFIX)
        {
            return Err(malformed("not a mutating operation"));
        }
        if vertex.dependencies.is_empty() {
            return Err(HashGraphError::NoDependencies(vertex.hash.clone()).into());
        }

        for dep in &vertex.dependencies {
            let Some(parent) = self.hash_graph.vertex(dep) else {
                return Err(HashGraphError::UnknownDependency {
                    vertex: vertex.hash.clone(),
                    dependency: dep.clone(),
                }
                .into());
            };
            if vertex.timestamp < parent.timestamp {
                return Err(ObjectError::InvalidTimestamp {
                    hash: vertex.hash.clone(),
                    reason: format!("earlier than dependency {dep}"),
                });
            }
        }

        let limit = self.clock.now_millis() + self.config.validation.max_clock_skew_ms;
        if vertex.timestamp > limit {
            return Err(ObjectError::InvalidTimestamp {
                hash: vertex.hash.clone(),
                reason: format!("{} is in the future", vertex.timestamp),
            });
        }
        Ok(())
    }

    fn verify_signature(&self, vertex: &Vertex, acl: &ObjectAcl) -> Result<(), ObjectError> {
        let require = self.config.validation.require_signatures;
        if vertex.signature.is_empty() {
            return if require {
                Err(ObjectError::MissingSignature(vertex.hash.clone()))
            } else {
                Ok(())
            };
        }
        match acl
            .query_get_peer_key(&vertex.peer_id)
            .filter(|key| !key.ed25519_public_key.is_empty())
        {
            Some(key) => {
                if verify_ed25519(
                    &key.ed25519_public_key,
                    vertex.hash.as_bytes(),
                    &vertex.signature,
                )? {
                    Ok(())
                } else {
                    Err(ObjectError::InvalidSignature(vertex.hash.clone()))
                }
            }
            None if require => Err(ObjectError::InvalidSignature(vertex.hash.clone())),
            None => Ok(()),
        }
    }

    /// DRP and ACL as of the union of `dependencies`.
    ///
    /// Starts from the cached snapshots at the dependencies' lowest common
    /// ancestor and replays the linearized operations between it and the
    /// dependencies. Replayed operations that the data type refuses are
    /// skipped; every replica skips the same ones.
    ///
    /// # Errors
    ///
    /// Fails if the ancestor search or linearization fails or no snapshot
    /// is cached at the ancestor.
    pub fn compute_state_at(
        &mut self,
        dependencies: &[Hash],
    ) -> Result<(D, ObjectAcl), ObjectError> {
        let (lca, order) = match dependencies {
            [single] => (single.clone(), Vec::new()),
            _ => {
                let mut subgraph = ObjectSet::new();
                let lca = self
                    .hash_graph
                    .lowest_common_ancestor_multiple_vertices(dependencies, &mut subgraph)?;
                let order = self
                    .hash_graph
                    .linearize_vertices(Some(&lca), Some(&subgraph))?;
                (lca, order)
            }
        };

        let drp_state = self
            .drp_states
            .get(&lca)
            .ok_or_else(|| ObjectError::MissingState(lca.clone()))?;
        let acl_state = self
            .acl_states
            .get(&lca)
            .ok_or_else(|| ObjectError::MissingState(lca.clone()))?;
        let mut drp = D::restore(&self.original_drp, drp_state)?;
        let mut acl = <ObjectAcl as Drp>::restore(&self.original_acl, acl_state)?;

        for hash in &order {
            let Some(vertex) = self.hash_graph.vertex(hash) else {
                continue;
            };
            let ctx = CallContext {
                caller: &vertex.peer_id,
            };
            let operation = &vertex.operation;
            let applied = match vertex.drp_type() {
                Some(DrpType::Drp) => drp.apply(&ctx, &operation.op_type, operation.args()),
                Some(DrpType::Acl) => acl.apply(&ctx, &operation.op_type, operation.args()),
                None => Ok(()),
            };
            if let Err(err) = applied {
                trace!(hash = %hash, "replayed operation skipped: {err}");
            }
        }
        Ok((drp, acl))
    }

    fn refresh_projections(&mut self) -> Result<(), ObjectError> {
        let frontier = self.hash_graph.frontier().to_vec();
        let (drp, acl) = self.compute_state_at(&frontier)?;
        self.drp = drp;
        self.acl = acl;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::acl::{AclGroup, AclOptions, grant_args};
    use crate::config::DrpObjectConfig;
    use crate::crypto::Keychain;
    use crate::error::ErrorCode;
    use crate::hashgraph::{Operation, ROOT_HASH, compute_hash};
    use crate::object::DrpObjectOptions;
    use crate::object::tests::{Tally, credential, object, permissionless_acl};

    fn history(obj: &DrpObject<Tally>) -> Vec<Vertex> {
        obj.hash_graph()
            .all_vertices()
            .into_iter()
            .filter(|v| !v.is_root())
            .cloned()
            .collect()
    }

    fn forged(peer: &str, deps: Vec<Hash>, op: &str, n: i64, timestamp: i64) -> Vertex {
        let operation = Operation::new(DrpType::Drp, op, vec![json!(n)]);
        Vertex {
            hash: compute_hash(peer, &operation, &deps, timestamp).unwrap(),
            peer_id: peer.into(),
            operation,
            dependencies: deps,
            timestamp,
            signature: Vec::new(),
        }
    }

    #[test]
    fn concurrent_replicas_converge() {
        let mut a = object("a", permissionless_acl("a"));
        let mut b = object("b", permissionless_acl("a"));
        a.call_drp("add", vec![json!(2)]).unwrap();
        b.call_drp("set", vec![json!(10)]).unwrap();
        b.call_drp("add", vec![json!(1)]).unwrap();

        let from_a = history(&a);
        let from_b = history(&b);
        assert_eq!(a.merge(&from_b).unwrap(), (true, vec![]));
        assert_eq!(b.merge(&from_a).unwrap(), (true, vec![]));

        assert_eq!(a.drp(), b.drp());
        assert_eq!(a.hash_graph().frontier().len(), 2);
        let order_a = a.hash_graph_mut().linearize_operations(None, None).unwrap();
        let order_b = b.hash_graph_mut().linearize_operations(None, None).unwrap();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn second_merge_of_same_batch_is_a_no_op() {
        let mut a = object("a", permissionless_acl("a"));
        let mut b = object("b", permissionless_acl("a"));
        a.call_drp("add", vec![json!(3)]).unwrap();
        let batch = history(&a);
        b.merge(&batch).unwrap();
        let state = b.drp().clone();
        assert_eq!(b.merge(&batch).unwrap(), (true, vec![]));
        assert_eq!(b.drp(), &state);
    }

    #[test]
    fn out_of_order_batch_is_admitted_by_retry() {
        let mut a = object("a", permissionless_acl("a"));
        a.call_drp("add", vec![json!(1)]).unwrap();
        a.call_drp("add", vec![json!(2)]).unwrap();
        a.call_drp("add", vec![json!(3)]).unwrap();
        let mut batch = history(&a);
        batch.sort_by_key(|v| std::cmp::Reverse(v.timestamp));

        let mut b = object("b", permissionless_acl("a"));
        let (complete, missing) = b.merge(&batch).unwrap();
        assert!(complete, "missing {missing:?}");
        assert_eq!(b.drp().total, 6);
    }

    #[test]
    fn unknown_dependency_is_reported_missing() {
        let mut b = object("b", permissionless_acl("a"));
        let orphan = forged("a", vec!["f".repeat(64)], "add", 1, 5);
        let (complete, missing) = b.merge(std::slice::from_ref(&orphan)).unwrap();
        assert!(!complete);
        assert_eq!(missing, vec![orphan.hash]);
        assert_eq!(b.hash_graph().vertex_count(), 1);
    }

    #[test]
    fn tampered_vertices_are_rejected() {
        let b = object("b", permissionless_acl("a"));
        let mut tampered = forged("a", vec![ROOT_HASH.into()], "add", 1, 5);
        tampered.operation.op_type = "set".into();
        assert_eq!(b.validate_vertex(&tampered).unwrap_err().code(), ErrorCode::InvalidHash);

        let future = forged("a", vec![ROOT_HASH.into()], "add", 1, i64::MAX / 2);
        assert_eq!(b.validate_vertex(&future).unwrap_err().code(), ErrorCode::InvalidTimestamp);

        let nop = {
            let operation = Operation::nop();
            let deps = vec![ROOT_HASH.to_string()];
            Vertex {
                hash: compute_hash("a", &operation, &deps, 1).unwrap(),
                peer_id: "a".into(),
                operation,
                dependencies: deps,
                timestamp: 1,
                signature: Vec::new(),
            }
        };
        assert_eq!(b.validate_vertex(&nop).unwrap_err().code(), ErrorCode::MalformedOperation);
    }

    #[test]
    fn writes_by_non_writers_are_rejected() {
        let restricted = || {
            ObjectAcl::new(AclOptions {
                admins: BTreeMap::from([("admin".to_string(), credential("admin"))]),
                ..AclOptions::default()
            })
        };
        let mut admin = object("admin", restricted());
        let mut other = object("other", restricted());
        let intruder = forged("other", vec![ROOT_HASH.into()], "add", 7, 1);
        assert_eq!(
            admin.merge(std::slice::from_ref(&intruder)).unwrap().1,
            vec![intruder.hash.clone()]
        );

        admin
            .call_acl("grant", grant_args("other", AclGroup::Writer, Some(&credential("other"))))
            .unwrap();
        other.merge(&history(&admin)).unwrap();
        let write = other.call_drp("add", vec![json!(7)]).unwrap().unwrap();
        assert_eq!(admin.merge(&[write]).unwrap(), (true, vec![]));
        assert_eq!(admin.drp().total, 7);
    }

    #[test]
    fn signatures_are_checked_against_acl_key() {
        let keys = Arc::new(Keychain::from_seed(b"a").unwrap());
        let acl = ObjectAcl::new(AclOptions {
            admins: BTreeMap::from([("a".to_string(), keys.public_credential())]),
            permissionless: true,
            ..AclOptions::default()
        });
        let mut a = DrpObject::new(
            DrpObjectOptions::new("a", Tally::default())
                .with_acl(acl.clone())
                .with_keychain(keys),
        )
        .unwrap();
        let mut config = DrpObjectConfig::default();
        config.validation.require_signatures = true;
        let mut b = DrpObject::new(
            DrpObjectOptions::new("b", Tally::default())
                .with_acl(acl)
                .with_config(config),
        )
        .unwrap();

        let good = a.call_drp("add", vec![json!(1)]).unwrap().unwrap();
        let mut bad = a.call_drp("add", vec![json!(2)]).unwrap().unwrap();
        bad.signature[0] ^= 0xff;
        let unsigned = {
            let mut v = forged("a", vec![good.hash.clone()], "add", 9, good.timestamp);
            v.signature.clear();
            v
        };

        let (_, missing) = b.merge(&[good.clone(), bad.clone(), unsigned.clone()]).unwrap();
        assert_eq!(missing.len(), 2);
        assert!(missing.contains(&bad.hash) && missing.contains(&unsigned.hash));
        assert!(b.hash_graph().contains(&good.hash));
    }

    #[test]
    fn merge_notifies_with_admitted_vertices() {
        let mut a = object("a", permissionless_acl("a"));
        let mut b = object("b", permissionless_acl("a"));
        a.call_drp("add", vec![json!(1)]).unwrap();
        a.call_drp("add", vec![json!(1)]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.subscribe(Box::new(move |origin, vertices| {
            sink.lock().unwrap().push((origin.to_string(), vertices.len()));
        }));
        b.merge(&history(&a)).unwrap();
        b.merge(&history(&a)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("merge".to_string(), 2)]);
    }

    #[test]
    fn state_at_concurrent_dependencies_replays_from_ancestor() {
        let mut a = object("a", permissionless_acl("a"));
        let mut b = object("b", permissionless_acl("a"));
        let base = a.call_drp("add", vec![json!(5)]).unwrap().unwrap();
        b.merge(&history(&a)).unwrap();
        let left = a.call_drp("add", vec![json!(1)]).unwrap().unwrap();
        let right = b.call_drp("add", vec![json!(10)]).unwrap().unwrap();
        a.merge(&[right.clone()]).unwrap();

        let (drp, _) = a.compute_state_at(&[left.hash, right.hash]).unwrap();
        assert_eq!(drp.total, 16);
        let (drp, _) = a.compute_state_at(&[base.hash]).unwrap();
        assert_eq!(drp.total, 5);
    }
}
