//! Registry of the proxies of one NetMeshBase, keyed by peer.

use dashmap::DashMap;
use meshbase_core::MeshBaseIdentifier;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::access_spec::CoherenceSpecification;
use crate::error::ProxyError;
use crate::net_mesh_base::NetMeshBase;
use crate::proxy::{Proxy, ProxyFactory};

/// Creates proxies on first use and hands out the same proxy afterwards.
pub struct ProxyManager {
    local: Weak<NetMeshBase>,
    factory: Arc<dyn ProxyFactory>,
    proxies: DashMap<MeshBaseIdentifier, Arc<dyn Proxy>>,
}

impl ProxyManager {
    /// Creates an empty registry.
    pub fn new(local: Weak<NetMeshBase>, factory: Arc<dyn ProxyFactory>) -> Self {
        Self {
            local,
            factory,
            proxies: DashMap::new(),
        }
    }

    /// The proxy to `partner`, creating it if needed. The coherence policy
    /// only applies when the proxy is created.
    pub fn obtain_for(
        &self,
        partner: &MeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> Result<Arc<dyn Proxy>, ProxyError> {
        if let Some(existing) = self.proxies.get(partner) {
            return Ok(existing.value().clone());
        }
        let entry = self.proxies.entry(partner.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(o) => Ok(o.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let proxy = self.factory.create_proxy(self.local.clone(), partner, coherence)?;
                debug!("Created proxy to {}", partner);
                v.insert(proxy.clone());
                Ok(proxy)
            }
        }
    }

    /// The proxy to `partner`, if one exists.
    pub fn get(&self, partner: &MeshBaseIdentifier) -> Option<Arc<dyn Proxy>> {
        self.proxies.get(partner).map(|p| p.value().clone())
    }

    /// All proxies.
    pub fn proxies(&self) -> Vec<Arc<dyn Proxy>> {
        self.proxies.iter().map(|p| p.value().clone()).collect()
    }

    /// Number of proxies.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True if no proxy exists.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Shuts down and forgets the proxy to `partner`.
    pub fn remove(&self, partner: &MeshBaseIdentifier) -> Option<Arc<dyn Proxy>> {
        let (_, proxy) = self.proxies.remove(partner)?;
        proxy.die();
        Some(proxy)
    }

    /// Shuts down all proxies.
    pub fn die(&self) {
        let count = self.proxies.len();
        for entry in self.proxies.iter() {
            entry.value().die();
        }
        self.proxies.clear();
        info!("Shut down {} proxies", count);
    }
}
