//! `DrpObject`: one DRP instance and its ACL bound to a hash graph.
//!
//! Local mutations go through [`DrpObject::call`], which runs the command on
//! a clone of the live projection and appends a vertex only if the snapshot
//! changed. Remote history enters through [`DrpObject::merge`]. Per-vertex
//! DRP and ACL snapshots are cached by hash; the live projections are always
//! recomputable from those caches and the frontier.

mod merge;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{Span, debug, info_span};

use crate::acl::{AclError, AclOptions, ObjectAcl};
use crate::clock::{Clock, SystemClock};
use crate::config::DrpObjectConfig;
use crate::crypto::{CryptoError, DrpPublicCredential, Keychain};
use crate::drp::{CallContext, Command, Drp, DrpError, DrpState, StateError};
use crate::error::ErrorCode;
use crate::finality::{Attestation, FinalityStore};
use crate::hashgraph::{
    DrpType, Hash, HashGraph, HashGraphError, Operation, ROOT_HASH, ResolveFn, Vertex, hex,
};

/// Subscriber invoked with the origin (`"call"` or `"merge"`) and the
/// vertices that were added.
pub type ObjectCallback = Box<dyn FnMut(&str, &[Vertex]) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error(transparent)]
    Graph(#[from] HashGraphError),

    #[error(transparent)]
    Drp(#[from] DrpError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("no cached state for vertex {0}")]
    MissingState(Hash),

    #[error("hash of vertex {0} does not match its content")]
    InvalidHash(Hash),

    #[error("vertex {hash} has an invalid timestamp: {reason}")]
    InvalidTimestamp { hash: Hash, reason: String },

    #[error("vertex {hash} carries a malformed operation: {reason}")]
    MalformedOperation { hash: Hash, reason: String },

    #[error("peer {peer} may not write `{target}`")]
    PermissionDenied { peer: String, target: String },

    #[error("signature of vertex {0} does not verify")]
    InvalidSignature(Hash),

    #[error("vertex {0} is not signed")]
    MissingSignature(Hash),

    #[error("invalid object configuration: {0}")]
    InvalidConfig(String),
}

impl ObjectError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Graph(err) => err.code(),
            Self::Drp(err) => err.code(),
            Self::State(err) => err.code(),
            Self::Crypto(err) => err.code(),
            Self::MissingState(_) => ErrorCode::MissingState,
            Self::InvalidHash(_) => ErrorCode::InvalidHash,
            Self::InvalidTimestamp { .. } => ErrorCode::InvalidTimestamp,
            Self::MalformedOperation { .. } => ErrorCode::MalformedOperation,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::MissingSignature(_) => ErrorCode::MissingSignature,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }
}

impl From<AclError> for ObjectError {
    fn from(err: AclError) -> Self {
        Self::Drp(DrpError::Acl(err))
    }
}

/// Construction parameters for [`DrpObject`].
#[derive(Debug)]
pub struct DrpObjectOptions<D> {
    pub peer_id: String,
    pub drp: D,
    /// When absent, an ACL with the local peer as sole admin is created.
    pub acl: Option<ObjectAcl>,
    /// Local public credential; falls back to the keychain's.
    pub public_credential: Option<DrpPublicCredential>,
    pub id: Option<String>,
    pub config: DrpObjectConfig,
    pub keychain: Option<Arc<Keychain>>,
    /// Timestamp source; the system clock when absent.
    pub clock: Option<Arc<dyn Clock>>,
}

impl<D> DrpObjectOptions<D> {
    pub fn new(peer_id: impl Into<String>, drp: D) -> Self {
        Self {
            peer_id: peer_id.into(),
            drp,
            acl: None,
            public_credential: None,
            id: None,
            config: DrpObjectConfig::default(),
            keychain: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn with_acl(mut self, acl: ObjectAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_keychain(mut self, keychain: Arc<Keychain>) -> Self {
        self.keychain = Some(keychain);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: DrpObjectConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A replicated object: hash graph, cached states, live projections and
/// finality votes.
pub struct DrpObject<D: Drp> {
    id: String,
    peer_id: String,
    hash_graph: HashGraph,
    drp: D,
    acl: ObjectAcl,
    original_drp: D,
    original_acl: ObjectAcl,
    drp_states: HashMap<Hash, DrpState>,
    acl_states: HashMap<Hash, DrpState>,
    finality_store: FinalityStore,
    keychain: Option<Arc<Keychain>>,
    clock: Arc<dyn Clock>,
    subscriptions: Vec<ObjectCallback>,
    config: DrpObjectConfig,
    span: Span,
}

impl<D: Drp + fmt::Debug> fmt::Debug for DrpObject<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrpObject")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("hash_graph", &self.hash_graph)
            .field("drp", &self.drp)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl<D: Drp> DrpObject<D> {
    /// # Errors
    ///
    /// Fails if the configuration is invalid, or no ACL is given and no
    /// local public credential is available to seed one.
    pub fn new(options: DrpObjectOptions<D>) -> Result<Self, ObjectError> {
        options
            .config
            .validate()
            .map_err(|err| ObjectError::InvalidConfig(err.to_string()))?;

        let acl = match options.acl {
            Some(acl) => acl,
            None => {
                let credential = options
                    .public_credential
                    .or_else(|| options.keychain.as_ref().map(|k| k.public_credential()))
                    .ok_or_else(|| {
                        ObjectError::InvalidConfig(
                            "an object without an ACL needs the local public credential".into(),
                        )
                    })?;
                ObjectAcl::new(AclOptions {
                    admins: BTreeMap::from([(options.peer_id.clone(), credential)]),
                    ..AclOptions::default()
                })
            }
        };
        let id = options
            .id
            .unwrap_or_else(|| generate_object_id(&options.peer_id));

        let acl_template = acl.clone();
        let drp_template = options.drp.clone();
        let acl_resolver: ResolveFn =
            Arc::new(move |vertices| acl_template.resolve_conflicts(vertices));
        let drp_resolver: ResolveFn =
            Arc::new(move |vertices| Drp::resolve_conflicts(&drp_template, vertices));
        let hash_graph = HashGraph::new(
            options.peer_id.clone(),
            Some(acl_resolver),
            Some(drp_resolver),
            Some(options.drp.semantics_type()),
        );

        let span = info_span!("drp_object", object_id = %id, peer_id = %options.peer_id);
        let mut finality_store = FinalityStore::new(&options.config.finality);
        finality_store.initialize_state(&ROOT_HASH.to_string(), &acl.query_get_finality_signers());

        Ok(Self {
            id,
            peer_id: options.peer_id,
            hash_graph,
            original_drp: options.drp.clone(),
            original_acl: acl.clone(),
            drp: options.drp,
            acl,
            drp_states: HashMap::from([(ROOT_HASH.to_string(), DrpState::new())]),
            acl_states: HashMap::from([(ROOT_HASH.to_string(), DrpState::new())]),
            finality_store,
            keychain: options.keychain,
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            subscriptions: Vec::new(),
            config: options.config,
            span,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The DRP as of the current frontier.
    #[must_use]
    pub const fn drp(&self) -> &D {
        &self.drp
    }

    /// The ACL as of the current frontier.
    #[must_use]
    pub const fn acl(&self) -> &ObjectAcl {
        &self.acl
    }

    #[must_use]
    pub const fn hash_graph(&self) -> &HashGraph {
        &self.hash_graph
    }

    /// Mutable graph access for linearization and causality queries.
    pub const fn hash_graph_mut(&mut self) -> &mut HashGraph {
        &mut self.hash_graph
    }

    #[must_use]
    pub const fn finality_store(&self) -> &FinalityStore {
        &self.finality_store
    }

    pub const fn finality_store_mut(&mut self) -> &mut FinalityStore {
        &mut self.finality_store
    }

    #[must_use]
    pub const fn config(&self) -> &DrpObjectConfig {
        &self.config
    }

    #[must_use]
    pub fn drp_state_at(&self, hash: &str) -> Option<&DrpState> {
        self.drp_states.get(hash)
    }

    #[must_use]
    pub fn acl_state_at(&self, hash: &str) -> Option<&DrpState> {
        self.acl_states.get(hash)
    }

    /// Register a callback for vertices added by `call` and `merge`.
    pub fn subscribe(&mut self, callback: ObjectCallback) {
        self.subscriptions.push(callback);
    }

    fn notify(&mut self, origin: &str, vertices: &[Vertex]) {
        for callback in &mut self.subscriptions {
            callback(origin, vertices);
        }
    }

    /// Run a command against the DRP (`DrpType::Drp`) or the ACL
    /// (`DrpType::Acl`).
    ///
    /// `query_` commands and commands that leave the snapshot unchanged
    /// return `Ok(None)` without touching history. Otherwise the new vertex
    /// is returned.
    ///
    /// # Errors
    ///
    /// Fails if the command is rejected, the local peer may not write, or
    /// the state cannot be snapshotted.
    pub fn call(
        &mut self,
        drp_type: DrpType,
        command: Command,
    ) -> Result<Option<Vertex>, ObjectError> {
        let _entered = self.span.clone().entered();
        if command.is_query() {
            return Ok(None);
        }
        let ctx = CallContext {
            caller: &self.peer_id,
        };

        let (next_drp, next_acl, changed) = match drp_type {
            DrpType::Drp => {
                if !self.acl.can_write(&self.peer_id) {
                    return Err(ObjectError::PermissionDenied {
                        peer: self.peer_id.clone(),
                        target: command.op_type,
                    });
                }
                let mut next = self.drp.clone();
                next.apply(&ctx, &command.op_type, &command.args)?;
                let changed = next.snapshot()? != self.drp.snapshot()?;
                (next, self.acl.clone(), changed)
            }
            DrpType::Acl => {
                let mut next = self.acl.clone();
                next.apply(&ctx, &command.op_type, &command.args)?;
                let changed = next.snapshot()? != self.acl.snapshot()?;
                (self.drp.clone(), next, changed)
            }
        };
        if !changed {
            debug!(op = %command.op_type, "no state change, vertex suppressed");
            return Ok(None);
        }

        let dependencies = self.hash_graph.frontier().to_vec();
        let timestamp = dependencies
            .iter()
            .filter_map(|dep| self.hash_graph.vertex(dep))
            .map(|dep| dep.timestamp)
            .fold(self.clock.now_millis(), i64::max);
        let operation = Operation::new(drp_type, command.op_type, command.args);
        let mut vertex = self
            .hash_graph
            .create_vertex(operation, dependencies, timestamp)?;
        if let Some(keychain) = &self.keychain {
            vertex.signature = keychain.sign_with_ed25519(vertex.hash.as_bytes());
        }
        self.hash_graph.add_to_frontier(vertex.clone())?;

        self.drp_states.insert(vertex.hash.clone(), next_drp.snapshot()?);
        self.acl_states.insert(vertex.hash.clone(), next_acl.snapshot()?);
        self.finality_store
            .initialize_state(&vertex.hash, &next_acl.query_get_finality_signers());
        self.drp = next_drp;
        self.acl = next_acl;

        debug!(hash = %vertex.hash, op = %vertex.operation.op_type, "vertex created");
        self.notify("call", std::slice::from_ref(&vertex));
        Ok(Some(vertex))
    }

    /// Shorthand for a DRP command.
    ///
    /// # Errors
    ///
    /// See [`DrpObject::call`].
    pub fn call_drp(
        &mut self,
        op_type: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<Option<Vertex>, ObjectError> {
        self.call(DrpType::Drp, Command::new(op_type, args))
    }

    /// Shorthand for an ACL command.
    ///
    /// # Errors
    ///
    /// See [`DrpObject::call`].
    pub fn call_acl(
        &mut self,
        op_type: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<Option<Vertex>, ObjectError> {
        self.call(DrpType::Acl, Command::new(op_type, args))
    }

    /// Vote on every vertex the local peer may vote on and has not yet.
    /// Votes are counted locally without verification and returned for
    /// broadcast.
    pub fn sign_finality_vertices(&mut self, keychain: &Keychain) -> Vec<Attestation> {
        let _entered = self.span.clone().entered();
        let mut pending: Vec<Hash> = self
            .finality_store
            .hashes()
            .filter(|hash| {
                self.finality_store.can_vote(&self.peer_id, hash) == Some(true)
                    && self.finality_store.voted(&self.peer_id, hash) == Some(false)
            })
            .cloned()
            .collect();
        pending.sort_unstable();

        let attestations: Vec<Attestation> = pending
            .into_iter()
            .map(|hash| Attestation {
                signature: keychain.sign_with_bls(hash.as_bytes()),
                data: hash,
            })
            .collect();
        let counted = self
            .finality_store
            .add_votes(&self.peer_id, &attestations, false);
        debug!(counted, "finality votes signed");
        attestations
    }
}

fn generate_object_id(peer_id: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(peer_id.as_bytes());
    hasher.update(salt);
    hex(&hasher.finalize())
}
