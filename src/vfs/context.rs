/*!
 * Filesystem Context
 *
 * The shared state behind one filesystem instance: the executor and call
 * bridge, the store session, the port inbox, pending remote queries and the
 * handler factories. Handlers get environments that never reference the
 * executor, so dropping the context tears everything down.
 */

use crate::backend::StoreBackend;
use crate::bridge::{CallBridge, Executor};
use crate::channel::{MessageChannel, RemoteQueries};
use crate::core::{BridgeResult, ErrnoTable, HandlerId};
use crate::handlers::{
    Handler, HandlerCell, PortEnv, PortHandler, PortInbox, StoreEnv, StoreHandler, StoreSession,
};
use crate::vfs::config::FsConfig;
use crate::vfs::paths::is_port_path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct FsContext {
    config: FsConfig,
    bridge: CallBridge,
    store: StoreEnv,
    port: PortEnv,
    next_handler: AtomicU64,
}

impl FsContext {
    /// Spawn the executor and wire the shared state together
    pub fn new(
        config: FsConfig,
        backend: Arc<dyn StoreBackend>,
        channel: Arc<dyn MessageChannel>,
    ) -> BridgeResult<Self> {
        let executor = Executor::spawn()?;
        let bridge = CallBridge::new(executor, config.serialization);

        let store = StoreEnv {
            backend,
            session: Arc::new(StoreSession::new()),
            remote: Arc::new(RemoteQueries::new(Arc::clone(&channel))),
            errno: Arc::new(ErrnoTable::new()),
            quota: config.store_quota,
            directory_fallback: config.directory_fallback,
            listing: config.listing,
        };
        let port = PortEnv {
            inbox: Arc::new(PortInbox::new()),
            channel,
        };

        info!(
            serialization = ?config.serialization,
            quota = config.store_quota,
            directory_fallback = ?config.directory_fallback,
            listing = ?config.listing,
            trace = config.trace,
            "Filesystem context ready"
        );

        Ok(Self {
            config,
            bridge,
            store,
            port,
            next_handler: AtomicU64::new(1),
        })
    }

    #[inline]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    #[inline]
    pub fn bridge(&self) -> &CallBridge {
        &self.bridge
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        self.bridge.executor()
    }

    #[inline]
    pub fn inbox(&self) -> &Arc<PortInbox> {
        &self.port.inbox
    }

    #[inline]
    pub fn remote(&self) -> &Arc<RemoteQueries> {
        &self.store.remote
    }

    #[inline]
    pub fn session(&self) -> &Arc<StoreSession> {
        &self.store.session
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed))
    }

    fn cell(&self, handler: Box<dyn Handler>) -> Arc<HandlerCell> {
        Arc::new(HandlerCell::new(self.next_id(), handler))
    }

    pub fn new_port_handler(&self) -> Arc<HandlerCell> {
        self.cell(Box::new(PortHandler::new(self.port.clone())))
    }

    pub fn new_store_handler(&self) -> Arc<HandlerCell> {
        self.cell(Box::new(StoreHandler::new(self.store.clone())))
    }

    /// A fresh handler of the family that owns `path`
    pub fn handler_for(&self, path: &str) -> Arc<HandlerCell> {
        if is_port_path(path) {
            self.new_port_handler()
        } else {
            self.new_store_handler()
        }
    }
}
