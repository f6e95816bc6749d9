//! Builder for global and private allocators

use std::sync::Arc;

use crate::{
    error::Result,
    memory::{AnonClusterSource, ClusterSource},
    pool::OomPolicy,
    registry::Registry,
    rings::AdapterDescriptor,
};

use super::{
    core::Allocator,
    params::{private_minimums, AllocatorParams},
    variant::AllocatorKind,
};

/// Builder for [`Allocator`]s
#[derive(Debug)]
pub struct AllocatorBuilder {
    name: String,
    params: Option<AllocatorParams>,
    source: Option<Arc<dyn ClusterSource>>,
    registry: Option<Arc<Registry>>,
    oom_policy: OomPolicy,
}

impl AllocatorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            source: None,
            registry: None,
            oom_policy: OomPolicy::default(),
        }
    }

    /// Private allocator sized for one adapter, never below the current
    /// private minimums
    pub fn for_adapter(adapter: &AdapterDescriptor) -> Result<Self> {
        let params = AllocatorParams::for_adapter(adapter, &private_minimums())?;
        Ok(Self::new(adapter.name.clone()).params(params))
    }

    /// Pool requests. Defaults to the global defaults for a global
    /// allocator and to the private minimums for a private one.
    pub fn params(mut self, params: AllocatorParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Where clusters come from (anonymous mappings by default)
    pub fn source(mut self, source: Arc<dyn ClusterSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Registry handing out the id (the process-wide one by default)
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// What finalize does when cluster memory runs out
    pub fn oom_policy(mut self, policy: OomPolicy) -> Self {
        self.oom_policy = policy;
        self
    }

    /// Build and register a private allocator.
    ///
    /// The pools are configured right away, so a bad request fails here.
    pub fn build_private(self) -> Result<Arc<Allocator>> {
        let params = self.params.unwrap_or_else(private_minimums);
        let alloc = self.build(AllocatorKind::Private, params);
        alloc.config()?;
        Self::register(alloc)
    }

    /// Build and register a global allocator. Configuration is deferred
    /// to its first finalize or `get_info`.
    pub fn build_global(self) -> Result<Arc<Allocator>> {
        let params = self.params.unwrap_or_else(AllocatorParams::global_defaults);
        let alloc = self.build(AllocatorKind::Global, params);
        Self::register(alloc)
    }

    fn build(self, kind: AllocatorKind, params: AllocatorParams) -> Arc<Allocator> {
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(AnonClusterSource::new()));
        let registry = self.registry.unwrap_or_else(Registry::global);
        Arc::new(Allocator::new(
            self.name,
            kind,
            params,
            self.oom_policy,
            source,
            registry,
        ))
    }

    fn register(alloc: Arc<Allocator>) -> Result<Arc<Allocator>> {
        let id = alloc.registry().assign_id(&alloc)?;
        alloc.set_id(id);
        log::debug!("{}: {} allocator registered as {}", alloc.name(), alloc.kind(), id);
        Ok(alloc)
    }
}
