//! Access control list versioned through the same hash graph as the data.
//!
//! Groups:
//!
//! - `Admin` may grant and revoke. Admin membership cannot be revoked.
//! - `Finality` may sign finality attestations.
//! - `Writer` may author DRP vertices. Ignored in permissionless mode.
//!
//! Concurrent grant and revoke of the same group for the same peer are
//! settled by [`AclConflictResolution`]. Under `RevokeWins`, a Writer
//! revocation also drops concurrent DRP vertices authored by the revoked
//! peer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::DrpPublicCredential;
use crate::drp::{CallContext, Drp, DrpError, arg};
use crate::error::ErrorCode;
use crate::hashgraph::{ActionType, DrpType, Hash, ResolveConflictsType, Vertex};

pub const GRANT: &str = "grant";
pub const REVOKE: &str = "revoke";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclGroup {
    Admin,
    Finality,
    Writer,
}

/// Which side wins a concurrent grant/revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AclConflictResolution {
    GrantWins,
    #[default]
    RevokeWins,
}

/// One privileged peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAccess {
    pub public_key: DrpPublicCredential,
    pub permissions: BTreeSet<AclGroup>,
}

#[derive(Debug, thiserror::Error)]
pub enum AclError {
    #[error("only admin peers can {action} permissions (sender {sender})")]
    NotAdmin { sender: String, action: &'static str },

    #[error("cannot revoke permissions from admin {0}")]
    RevokeFromAdmin(String),

    #[error("cannot grant write permission to {0} in permissionless mode")]
    WriterInPermissionless(String),
}

impl AclError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotAdmin { .. } => ErrorCode::PermissionDenied,
            Self::RevokeFromAdmin(_) | Self::WriterInPermissionless(_) => {
                ErrorCode::AclPolicyViolation
            }
        }
    }
}

/// Construction parameters for [`ObjectAcl`].
#[derive(Debug, Clone, Default)]
pub struct AclOptions {
    pub admins: BTreeMap<String, DrpPublicCredential>,
    pub permissionless: bool,
    pub conflict_resolution: AclConflictResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAcl {
    permissionless: bool,
    conflict_resolution: AclConflictResolution,
    privileged_users: BTreeMap<String, PeerAccess>,
}

/// An ACL vertex decoded for conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change<'a> {
    Grant(&'a str, AclGroup),
    Revoke(&'a str, AclGroup),
}

impl ObjectAcl {
    /// Initial admins receive `Admin` and `Finality`, plus `Writer` unless
    /// the object is permissionless.
    #[must_use]
    pub fn new(options: AclOptions) -> Self {
        let mut permissions = BTreeSet::from([AclGroup::Admin, AclGroup::Finality]);
        if !options.permissionless {
            permissions.insert(AclGroup::Writer);
        }
        let privileged_users = options
            .admins
            .into_iter()
            .map(|(peer, public_key)| {
                (
                    peer,
                    PeerAccess {
                        public_key,
                        permissions: permissions.clone(),
                    },
                )
            })
            .collect();
        Self {
            permissionless: options.permissionless,
            conflict_resolution: options.conflict_resolution,
            privileged_users,
        }
    }

    #[must_use]
    pub const fn permissionless(&self) -> bool {
        self.permissionless
    }

    #[must_use]
    pub const fn conflict_resolution(&self) -> AclConflictResolution {
        self.conflict_resolution
    }

    /// Give `peer` membership of `group`. An existing peer keeps its key.
    ///
    /// # Errors
    ///
    /// Fails if `sender` is not an admin or a Writer grant is attempted in
    /// permissionless mode.
    pub fn grant(
        &mut self,
        sender: &str,
        peer: &str,
        group: AclGroup,
        public_key: DrpPublicCredential,
    ) -> Result<(), AclError> {
        if !self.query_is_admin(sender) {
            return Err(AclError::NotAdmin {
                sender: sender.to_string(),
                action: GRANT,
            });
        }
        if group == AclGroup::Writer && self.permissionless {
            return Err(AclError::WriterInPermissionless(peer.to_string()));
        }
        self.privileged_users
            .entry(peer.to_string())
            .or_insert_with(|| PeerAccess {
                public_key,
                permissions: BTreeSet::new(),
            })
            .permissions
            .insert(group);
        Ok(())
    }

    /// Remove `peer` from `group`. Revoking `Admin` is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if `sender` is not an admin or `peer` is an admin.
    pub fn revoke(&mut self, sender: &str, peer: &str, group: AclGroup) -> Result<(), AclError> {
        if !self.query_is_admin(sender) {
            return Err(AclError::NotAdmin {
                sender: sender.to_string(),
                action: REVOKE,
            });
        }
        if self.query_is_admin(peer) {
            return Err(AclError::RevokeFromAdmin(peer.to_string()));
        }
        if group != AclGroup::Admin
            && let Some(user) = self.privileged_users.get_mut(peer)
        {
            user.permissions.remove(&group);
        }
        Ok(())
    }

    fn has(&self, peer: &str, group: AclGroup) -> bool {
        self.privileged_users
            .get(peer)
            .is_some_and(|user| user.permissions.contains(&group))
    }

    #[must_use]
    pub fn query_is_admin(&self, peer: &str) -> bool {
        self.has(peer, AclGroup::Admin)
    }

    #[must_use]
    pub fn query_is_finality_signer(&self, peer: &str) -> bool {
        self.has(peer, AclGroup::Finality)
    }

    #[must_use]
    pub fn query_is_writer(&self, peer: &str) -> bool {
        self.has(peer, AclGroup::Writer)
    }

    /// Whether `peer` may author DRP vertices at this point in history.
    #[must_use]
    pub fn can_write(&self, peer: &str) -> bool {
        self.permissionless || self.query_is_writer(peer)
    }

    #[must_use]
    pub fn query_get_peer_key(&self, peer: &str) -> Option<&DrpPublicCredential> {
        self.privileged_users.get(peer).map(|user| &user.public_key)
    }

    #[must_use]
    pub fn query_get_finality_signers(&self) -> BTreeMap<String, DrpPublicCredential> {
        self.privileged_users
            .iter()
            .filter(|(_, user)| user.permissions.contains(&AclGroup::Finality))
            .map(|(peer, user)| (peer.clone(), user.public_key.clone()))
            .collect()
    }

    fn decode(vertex: &Vertex) -> Option<Change<'_>> {
        if vertex.drp_type() != Some(DrpType::Acl) {
            return None;
        }
        let args = vertex.operation.args();
        let target = args.first()?.as_str()?;
        let group = serde_json::from_value::<AclGroup>(args.get(1)?.clone()).ok()?;
        match vertex.operation.op_type.as_str() {
            GRANT => Some(Change::Grant(target, group)),
            REVOKE => Some(Change::Revoke(target, group)),
            _ => None,
        }
    }

    /// Whether `vertex` is the losing side against a concurrent `other`.
    fn loses_to(&self, vertex: &Vertex, other: &Vertex) -> bool {
        match (Self::decode(vertex), Self::decode(other)) {
            (Some(Change::Grant(t1, g1)), Some(Change::Revoke(t2, g2))) => {
                t1 == t2
                    && g1 == g2
                    && self.conflict_resolution == AclConflictResolution::RevokeWins
            }
            (Some(Change::Revoke(t1, g1)), Some(Change::Grant(t2, g2))) => {
                t1 == t2 && g1 == g2 && self.conflict_resolution == AclConflictResolution::GrantWins
            }
            (None, Some(Change::Revoke(target, AclGroup::Writer))) => {
                vertex.drp_type() == Some(DrpType::Drp)
                    && vertex.peer_id == target
                    && !self.permissionless
                    && self.conflict_resolution == AclConflictResolution::RevokeWins
            }
            _ => false,
        }
    }

    /// Resolve a set of concurrent vertices involving ACL changes.
    ///
    /// Pairs answer `DropLeft`/`DropRight`; larger groups answer `Drop` with
    /// the losing hashes.
    #[must_use]
    pub fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        let losers: Vec<usize> = (0..vertices.len())
            .filter(|&x| {
                vertices
                    .iter()
                    .enumerate()
                    .any(|(y, other)| y != x && self.loses_to(vertices[x], other))
            })
            .collect();

        match (vertices.len(), losers.as_slice()) {
            (_, []) => ResolveConflictsType::nop(),
            (2, [0]) => ResolveConflictsType::action(ActionType::DropLeft),
            (2, [1]) => ResolveConflictsType::action(ActionType::DropRight),
            _ => ResolveConflictsType::drop(
                losers
                    .iter()
                    .map(|&x| vertices[x].hash.clone())
                    .collect::<Vec<Hash>>(),
            ),
        }
    }
}

impl Drp for ObjectAcl {
    fn apply(
        &mut self,
        ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        match op_type {
            GRANT => {
                let peer: String = arg(op_type, args, 0)?;
                let group: AclGroup = arg(op_type, args, 1)?;
                let public_key = if args.len() > 2 {
                    arg(op_type, args, 2)?
                } else {
                    DrpPublicCredential::default()
                };
                self.grant(ctx.caller, &peer, group, public_key)?;
                Ok(())
            }
            REVOKE => {
                let peer: String = arg(op_type, args, 0)?;
                let group: AclGroup = arg(op_type, args, 1)?;
                self.revoke(ctx.caller, &peer, group)?;
                Ok(())
            }
            other => Err(DrpError::UnknownOperation(other.to_string())),
        }
    }

    fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        Self::resolve_conflicts(self, vertices)
    }
}

/// Arguments for a `grant` ACL operation.
#[must_use]
pub fn grant_args(
    peer: &str,
    group: AclGroup,
    public_key: Option<&DrpPublicCredential>,
) -> Vec<Value> {
    let mut args = vec![Value::from(peer), serde_json::to_value(group).unwrap_or(Value::Null)];
    if let Some(key) = public_key {
        args.push(serde_json::to_value(key).unwrap_or(Value::Null));
    }
    args
}

/// Arguments for a `revoke` ACL operation.
#[must_use]
pub fn revoke_args(peer: &str, group: AclGroup) -> Vec<Value> {
    vec![Value::from(peer), serde_json::to_value(group).unwrap_or(Value::Null)]
}
