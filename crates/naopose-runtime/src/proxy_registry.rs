//! [`ProxyRegistry`] – lazily created, memoised module proxies.
//!
//! Each module name maps to a [`ProxySlot`].  A name that has never been
//! asked for is simply absent (unattempted).  The first lookup connects and
//! stores either the handle or the failure; later lookups return what was
//! stored without reconnecting.  A failed slot stays failed until
//! [`ProxyRegistry::forget`] clears it.
//!
//! Every name gets its own [`OnceCell`].  The map lock is only held to
//! fetch or insert that cell, never across a connect, so two callers racing
//! on the same name produce a single attempt while a slow module does not
//! hold up lookups of any other.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use naopose_middleware::{ModuleConnector, ModuleProxy};
use naopose_types::ConnectionParams;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error};

/// Stored result of a connection attempt.
#[derive(Clone)]
pub enum ProxySlot {
    Failed(String),
    Ready(Arc<dyn ModuleProxy>),
}

impl fmt::Debug for ProxySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySlot::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            ProxySlot::Ready(proxy) => f.debug_tuple("Ready").field(&proxy.module_name()).finish(),
        }
    }
}

/// Observable state of one module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// Never asked for, or the first attempt is still connecting.
    Unattempted,
    Failed(String),
    Ready,
}

type SlotCell = Arc<OnceCell<ProxySlot>>;

pub struct ProxyRegistry {
    connector: Arc<dyn ModuleConnector>,
    params: ConnectionParams,
    slots: Mutex<HashMap<String, SlotCell>>,
}

impl ProxyRegistry {
    pub fn new(connector: Arc<dyn ModuleConnector>, params: ConnectionParams) -> Self {
        Self {
            connector,
            params,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Return the proxy for `module`, connecting on first use.
    ///
    /// Returns `None` when the module is unreachable, now or on an earlier
    /// attempt.  A fresh failure is logged at error level when `warn` is set.
    pub async fn get(&self, module: &str, warn: bool) -> Option<Arc<dyn ModuleProxy>> {
        let cell = self.cell(module).await;

        let slot = cell
            .get_or_init(|| async {
                match self.connector.connect(module, &self.params).await {
                    Ok(proxy) => {
                        debug!(module, broker = %self.params, "proxy created");
                        ProxySlot::Ready(proxy)
                    }
                    Err(e) => {
                        if warn {
                            error!(
                                module,
                                broker = %self.params,
                                error = %e,
                                "could not create proxy"
                            );
                        }
                        ProxySlot::Failed(e.to_string())
                    }
                }
            })
            .await;

        match slot {
            ProxySlot::Ready(proxy) => Some(Arc::clone(proxy)),
            ProxySlot::Failed(_) => None,
        }
    }

    async fn cell(&self, module: &str) -> SlotCell {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(module.to_string()).or_default())
    }

    pub async fn status(&self, module: &str) -> SlotStatus {
        let slots = self.slots.lock().await;
        match slots.get(module).and_then(|cell| cell.get()) {
            None => SlotStatus::Unattempted,
            Some(ProxySlot::Failed(reason)) => SlotStatus::Failed(reason.clone()),
            Some(ProxySlot::Ready(_)) => SlotStatus::Ready,
        }
    }

    /// Drop whatever is stored for `module` so the next lookup reconnects.
    /// Returns `true` if a finished attempt was dropped.
    pub async fn forget(&self, module: &str) -> bool {
        self.slots
            .lock()
            .await
            .remove(module)
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop every stored slot.  Returns how many finished attempts were
    /// released.  A connect still in flight completes into a detached cell.
    pub async fn release_all(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let released = slots.values().filter(|cell| cell.initialized()).count();
        slots.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBroker, connector};
    use std::time::Duration;

    fn registry(broker: &Arc<FakeBroker>) -> ProxyRegistry {
        ProxyRegistry::new(connector(broker), ConnectionParams::default())
    }

    /// Verify that a second lookup returns the same handle without reconnecting.
    #[tokio::test]
    async fn lookup_is_memoised() {
        let broker = FakeBroker::new(&["ALMemory"], "2.8.5.10");
        let reg = registry(&broker);

        let first = reg.get("ALMemory", true).await.unwrap();
        let second = reg.get("ALMemory", true).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.connects("ALMemory"), 1);
        assert_eq!(reg.status("ALMemory").await, SlotStatus::Ready);
    }

    /// Verify that a failed module is not retried.
    #[tokio::test]
    async fn failure_is_cached_and_not_retried() {
        let broker = FakeBroker::new(&["ALMemory"], "2.8.5.10");
        let reg = registry(&broker);

        assert!(reg.get("ALMotion", true).await.is_none());
        assert!(reg.get("ALMotion", false).await.is_none());

        assert_eq!(broker.connects("ALMotion"), 1);
        assert!(matches!(reg.status("ALMotion").await, SlotStatus::Failed(_)));
    }

    #[tokio::test]
    async fn unattempted_until_first_lookup() {
        let broker = FakeBroker::new(&["ALMemory"], "2.8.5.10");
        let reg = registry(&broker);
        assert_eq!(reg.status("ALMemory").await, SlotStatus::Unattempted);
        assert_eq!(broker.connects("ALMemory"), 0);
    }

    /// Verify that `forget` lets a failed module connect again.
    #[tokio::test]
    async fn forget_allows_a_new_attempt() {
        let broker = FakeBroker::new(&[], "2.8.5.10");
        let reg = registry(&broker);

        assert!(reg.get("ALMemory", false).await.is_none());
        broker.host("ALMemory");
        assert!(reg.get("ALMemory", false).await.is_none());

        assert!(reg.forget("ALMemory").await);
        assert!(reg.get("ALMemory", false).await.is_some());
        assert_eq!(broker.connects("ALMemory"), 2);
    }

    /// Verify that racing lookups of one module connect once.
    #[tokio::test]
    async fn concurrent_lookups_connect_once() {
        let broker = FakeBroker::new(&["ALMemory"], "2.8.5.10");
        let reg = Arc::new(registry(&broker));

        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                tokio::spawn(async move { reg.get("ALMemory", true).await.is_some() })
            })
            .collect();
        for lookup in lookups {
            assert!(lookup.await.unwrap());
        }

        assert_eq!(broker.connects("ALMemory"), 1);
    }

    /// Verify that a module stuck connecting does not block lookups of
    /// other modules or status queries.
    #[tokio::test]
    async fn pending_connect_does_not_block_other_modules() {
        let broker = FakeBroker::new(&["ALMemory", "ALHung"], "2.8.5.10");
        broker.hang_connect("ALHung");
        let reg = Arc::new(registry(&broker));

        let hung = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.get("ALHung", true).await.is_some() })
        };
        while broker.connects("ALHung") == 0 {
            tokio::task::yield_now().await;
        }

        let memory = tokio::time::timeout(Duration::from_secs(1), reg.get("ALMemory", true))
            .await
            .expect("lookup of another module must not wait on ALHung");
        assert!(memory.is_some());
        assert_eq!(reg.status("ALHung").await, SlotStatus::Unattempted);
        assert_eq!(reg.status("ALMemory").await, SlotStatus::Ready);

        hung.abort();
    }

    /// Verify that `release_all` drops ready and failed slots alike.
    #[tokio::test]
    async fn release_all_empties_the_registry() {
        let broker = FakeBroker::new(&["ALMemory"], "2.8.5.10");
        let reg = registry(&broker);
        reg.get("ALMemory", true).await;
        reg.get("ALMotion", false).await;

        assert_eq!(reg.release_all().await, 2);
        assert_eq!(reg.status("ALMemory").await, SlotStatus::Unattempted);
    }
}
