//! The single-process node backend.
//!
//! Inbound requests flow through a bounded queue into one delivery
//! thread, which builds the response, commits the triple (request,
//! response, history updates) and advances the store roots. One commit
//! per delivered request: block packaging belongs to the consensus
//! collaborator and `transactions_per_block` is deliberately ignored
//! here.

use crate::future::{FutureSlot, TransactionFuture};
use crate::{constructor_outcome, method_outcome, Node};
use arca_execution::builders::{build, BuildFailure, BuilderEnv};
use arca_execution::NodeCaches;
use arca_state::{NodeStore, MERGED_ROOT_LEN};
use arca_storage::{Database, RedbDatabase};
use arca_types::config::{ConsensusParams, NodeConfig};
use arca_types::error::{NodeError, StateError};
use arca_types::requests::{
    ConstructorCallRequest, GameteCreationRequest, InitialModuleStoreRequest,
    InitializationRequest, InstanceMethodCallRequest, ModuleStoreRequest, StaticMethodCallRequest,
    TransferRequest,
};
use arca_types::signatures::ClassTag;
use arca_types::{
    StorageReference, StorageValue, TransactionReference, TransactionRequest, TransactionResponse,
    Update,
};
use arca_vm::{GasCostModel, WhiteList};
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Delivery {
    request: TransactionRequest,
    slot: Arc<FutureSlot>,
}

struct Shared {
    store: RwLock<NodeStore>,
    caches: NodeCaches,
    consensus: ConsensusParams,
    config: NodeConfig,
    costs: GasCostModel,
    whitelist: WhiteList,
    /// Bumped after every commit; polled responses wait on it.
    commits: Mutex<u64>,
    committed: Condvar,
}

pub struct LocalNode {
    shared: Arc<Shared>,
    sender: Option<mpsc::Sender<Delivery>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl LocalNode {
    /// Opens (or creates) a node over an on-disk store.
    pub fn open(config: NodeConfig, consensus: ConsensusParams) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.dir).map_err(|e| {
            NodeError::Unavailable(format!("cannot create {}: {e}", config.dir.display()))
        })?;
        let db = RedbDatabase::open(config.dir.join("store.redb"))
            .map_err(|e| NodeError::State(StateError::Storage(e)))?;
        Self::with_database(Arc::new(db), config, consensus)
    }

    /// Opens a node over an arbitrary store backend. Tests use the
    /// in-memory one.
    pub fn with_database(
        db: Arc<dyn Database>,
        config: NodeConfig,
        consensus: ConsensusParams,
    ) -> Result<Self, NodeError> {
        let store = NodeStore::open(db, config.checkable_depth)?;
        // Replicated consensus parameters win over the locally provided
        // ones once the node is initialized.
        let consensus = match store.get_consensus_params()? {
            Some(stored) => stored,
            None => consensus,
        };

        let shared = Arc::new(Shared {
            store: RwLock::new(store),
            caches: NodeCaches::new(),
            consensus: consensus.clone(),
            config: config.clone(),
            costs: GasCostModel::default(),
            whitelist: WhiteList::default(),
            commits: Mutex::new(0),
            committed: Condvar::new(),
        });
        shared.caches.set_consensus(consensus);

        let (sender, mut receiver) = mpsc::channel::<Delivery>(config.mempool_capacity.max(1));
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("arca-delivery".into())
            .spawn(move || {
                while let Some(delivery) = receiver.blocking_recv() {
                    let outcome = deliver_one(&worker_shared, &delivery.request);
                    delivery.slot.resolve(outcome);
                }
            })
            .map_err(|e| NodeError::Unavailable(format!("cannot spawn delivery thread: {e}")))?;

        info!(target: "node", "node started");
        Ok(Self {
            shared,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// The current authenticated state commitment.
    pub fn merged_root(&self) -> Result<[u8; MERGED_ROOT_LEN], NodeError> {
        Ok(self.store_read()?.merged_root())
    }

    /// Delivers a request synchronously, bypassing the mempool. This is
    /// the surface a replicated-log adapter drives with its ordered
    /// requests.
    pub fn deliver(
        &self,
        request: TransactionRequest,
    ) -> Result<(TransactionReference, TransactionResponse), NodeError> {
        deliver_one(&self.shared, &request)
    }

    /// Commits any pending state; a no-op here because [`LocalNode`]
    /// commits per delivery, kept for the log-backed surface.
    pub fn commit_block(&self) -> Result<[u8; MERGED_ROOT_LEN], NodeError> {
        self.merged_root()
    }

    /// Points the node at a historical merged root within the retention
    /// window.
    pub fn checkout(&self, root: &[u8]) -> Result<(), NodeError> {
        let mut store = self
            .shared
            .store
            .write()
            .map_err(|_| NodeError::Unavailable("store lock poisoned".into()))?;
        store.checkout(root)?;
        self.shared.caches.invalidate_classloaders();
        Ok(())
    }

    /// Re-reads the consensus parameters from state, as after manifest
    /// changes.
    pub fn recompute_consensus(&self) -> Result<ConsensusParams, NodeError> {
        let params = match self.store_read()?.get_consensus_params()? {
            Some(stored) => stored,
            None => self.shared.consensus.clone(),
        };
        self.shared.caches.set_consensus(params.clone());
        Ok(params)
    }

    fn store_read(&self) -> Result<std::sync::RwLockReadGuard<'_, NodeStore>, NodeError> {
        self.shared
            .store
            .read()
            .map_err(|_| NodeError::Unavailable("store lock poisoned".into()))
    }

    fn add(&self, request: TransactionRequest) -> Result<TransactionResponse, NodeError> {
        let future = self.post_transaction(request)?;
        future.get().map(|(_, response)| response)
    }

    fn run_view(
        &self,
        request: TransactionRequest,
    ) -> Result<Option<StorageValue>, NodeError> {
        let store = self.store_read()?;
        let env = BuilderEnv {
            store: &*store,
            caches: &self.shared.caches,
            consensus: self.shared.consensus.clone(),
            costs: self.shared.costs.clone(),
            whitelist: self.shared.whitelist.clone(),
            view_gas_cap: Some(self.shared.config.max_gas_per_view_transaction),
        };
        match build(&request, &env) {
            Ok((_, response)) => method_outcome(response),
            Err(BuildFailure::Rejected(message)) => {
                Err(NodeError::TransactionRejected { message })
            }
            Err(BuildFailure::State(e)) => Err(NodeError::State(e)),
        }
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        // Closing the channel stops the delivery thread.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Builds, commits and publishes one request. The only writer of the
/// store is the delivery path, so the read-build/write-commit split
/// cannot race.
fn deliver_one(
    shared: &Shared,
    request: &TransactionRequest,
) -> Result<(TransactionReference, TransactionResponse), NodeError> {
    let built = {
        let store = shared
            .store
            .read()
            .map_err(|_| NodeError::Unavailable("store lock poisoned".into()))?;

        let reference = arca_crypto::hash::reference_of(request)
            .map_err(|e| NodeError::TransactionRejected { message: e.to_string() })?;
        // Replays of an already committed request are answered from the
        // store instead of being rebuilt.
        if let Some(existing) = store.get_response(&reference)? {
            return Ok((reference, existing));
        }

        let env = BuilderEnv {
            store: &*store,
            caches: &shared.caches,
            consensus: shared.consensus.clone(),
            costs: shared.costs.clone(),
            whitelist: shared.whitelist.clone(),
            view_gas_cap: None,
        };
        build(request, &env)
    };

    let (reference, response) = match built {
        Ok(pair) => pair,
        Err(BuildFailure::Rejected(message)) => {
            return Err(NodeError::TransactionRejected { message })
        }
        Err(BuildFailure::State(e)) => return Err(NodeError::State(e)),
    };

    {
        let mut store = shared
            .store
            .write()
            .map_err(|_| NodeError::Unavailable("store lock poisoned".into()))?;

        store.put_delivery(&reference, request, &response)?;

        // Histories gain this transaction at the front, once per object.
        let mut touched: BTreeSet<StorageReference> = BTreeSet::new();
        for update in response.updates() {
            touched.insert(*update.object());
        }
        for object in touched {
            let mut history = store.get_history(&object)?;
            if history.first() != Some(&reference) {
                history.insert(0, reference);
            }
            store.put_history(&object, &history)?;
        }

        match (&request, &response) {
            (TransactionRequest::InitialModuleStore(_), _) => {
                store.set_base_code(&reference)?;
            }
            (_, TransactionResponse::GameteCreation(r)) => {
                store.set_gamete(&r.gamete)?;
            }
            (TransactionRequest::Initialization(r), _) => {
                store.set_manifest(&r.manifest)?;
                store.set_consensus_params(&shared.consensus)?;
            }
            _ => {}
        }

        store.commit()?;
    }

    if matches!(response, TransactionResponse::ModuleStoreSuccessful(_)) {
        shared.caches.invalidate_classloaders();
    }

    if let Ok(mut commits) = shared.commits.lock() {
        *commits += 1;
        shared.committed.notify_all();
    }

    Ok((reference, response))
}

impl Node for LocalNode {
    fn base_code(&self) -> Result<TransactionReference, NodeError> {
        self.store_read()?
            .get_base_code()?
            .ok_or_else(|| NodeError::Unavailable("no base module installed".into()))
    }

    fn manifest(&self) -> Result<StorageReference, NodeError> {
        self.store_read()?
            .get_manifest()?
            .ok_or_else(|| NodeError::Unavailable("the node is not initialized".into()))
    }

    fn class_tag(&self, object: &StorageReference) -> Result<ClassTag, NodeError> {
        if let Some(tag) = self.shared.caches.class_tag(object) {
            return Ok(tag);
        }
        let tag = self
            .state(object)?
            .into_iter()
            .find_map(|update| match update {
                Update::ClassTag {
                    object,
                    class,
                    module,
                } => Some(ClassTag {
                    object,
                    class,
                    module,
                }),
                _ => None,
            })
            .ok_or_else(|| NodeError::Unavailable(format!("no class tag for {object}")))?;
        self.shared.caches.record_class_tag(tag.clone());
        Ok(tag)
    }

    fn state(&self, object: &StorageReference) -> Result<Vec<Update>, NodeError> {
        let store = self.store_read()?;
        let history = store.get_history(object)?;
        if history.is_empty() {
            return Err(NodeError::Unavailable(format!("unknown object {object}")));
        }
        // Newest-first scan: the first update per subject wins (P6).
        let mut current: Vec<Update> = Vec::new();
        for transaction in history {
            let Some(response) = store.get_response(&transaction)? else {
                continue;
            };
            for update in response.updates() {
                if update.object() == object
                    && !current.iter().any(|seen| seen.same_subject(update))
                {
                    current.push(update.clone());
                }
            }
        }
        Ok(current)
    }

    fn request(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionRequest>, NodeError> {
        Ok(self.store_read()?.get_request(reference)?)
    }

    fn response(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionResponse>, NodeError> {
        Ok(self.store_read()?.get_response(reference)?)
    }

    fn polled_response(
        &self,
        reference: &TransactionReference,
        timeout: Duration,
    ) -> Result<TransactionResponse, NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.response(reference)? {
                return Ok(response);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NodeError::PollTimeout(reference.to_string()));
            }
            let commits = self
                .shared
                .commits
                .lock()
                .map_err(|_| NodeError::Unavailable("commit lock poisoned".into()))?;
            let _ = self
                .shared
                .committed
                .wait_timeout(commits, deadline - now)
                .map_err(|_| NodeError::Unavailable("commit lock poisoned".into()))?;
        }
    }

    fn add_initial_module_store_transaction(
        &self,
        request: InitialModuleStoreRequest,
    ) -> Result<TransactionReference, NodeError> {
        let request = TransactionRequest::InitialModuleStore(request);
        let future = self.post_transaction(request)?;
        future.get().map(|(reference, _)| reference)
    }

    fn add_gamete_creation_transaction(
        &self,
        request: GameteCreationRequest,
    ) -> Result<StorageReference, NodeError> {
        match self.add(TransactionRequest::GameteCreation(request))? {
            TransactionResponse::GameteCreation(r) => Ok(r.gamete),
            other => Err(NodeError::Unavailable(format!(
                "unexpected response shape {other:?}"
            ))),
        }
    }

    fn add_initialization_transaction(
        &self,
        request: InitializationRequest,
    ) -> Result<(), NodeError> {
        self.add(TransactionRequest::Initialization(request))
            .map(|_| ())
    }

    fn add_module_store_transaction(
        &self,
        request: ModuleStoreRequest,
    ) -> Result<TransactionReference, NodeError> {
        let future = self.post_transaction(TransactionRequest::ModuleStore(request))?;
        let (reference, response) = future.get()?;
        match response {
            TransactionResponse::ModuleStoreSuccessful(_) => Ok(reference),
            TransactionResponse::ModuleStoreFailed(r) => Err(NodeError::TransactionFailed {
                class_name_of_cause: r.cause.class_name_of_cause,
                message: r.cause.message,
                where_: r.cause.where_,
            }),
            other => Err(NodeError::Unavailable(format!(
                "unexpected response shape {other:?}"
            ))),
        }
    }

    fn add_constructor_call_transaction(
        &self,
        request: ConstructorCallRequest,
    ) -> Result<StorageReference, NodeError> {
        constructor_outcome(self.add(TransactionRequest::ConstructorCall(request))?)
    }

    fn add_instance_method_call_transaction(
        &self,
        request: InstanceMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError> {
        method_outcome(self.add(TransactionRequest::InstanceMethodCall(request))?)
    }

    fn add_static_method_call_transaction(
        &self,
        request: StaticMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError> {
        method_outcome(self.add(TransactionRequest::StaticMethodCall(request))?)
    }

    fn add_transfer_transaction(&self, request: TransferRequest) -> Result<(), NodeError> {
        method_outcome(self.add(TransactionRequest::Transfer(request))?).map(|_| ())
    }

    fn post_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionFuture, NodeError> {
        let slot = FutureSlot::new();
        let delivery = Delivery {
            request,
            slot: slot.clone(),
        };
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| NodeError::Unavailable("the node is shutting down".into()))?;
        // Back-pressure: a full mempool blocks the producer.
        sender.blocking_send(delivery).map_err(|_| {
            warn!(target: "mempool", "delivery thread gone");
            NodeError::Unavailable("delivery thread gone".into())
        })?;
        Ok(TransactionFuture { slot })
    }

    fn run_instance_method_call_transaction(
        &self,
        request: InstanceMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError> {
        self.run_view(TransactionRequest::InstanceMethodCall(request))
    }

    fn run_static_method_call_transaction(
        &self,
        request: StaticMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError> {
        self.run_view(TransactionRequest::StaticMethodCall(request))
    }
}
