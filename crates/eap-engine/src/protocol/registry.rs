use radius_proto::MethodType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::Payload;

/// Builds a fresh handler for one method
pub type Constructor = Arc<dyn Fn() -> Box<dyn Payload> + Send + Sync>;

/// Method identifier to handler constructor
#[derive(Clone, Default)]
pub struct MethodRegistry {
    constructors: BTreeMap<MethodType, Constructor>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, returning the constructor it replaces
    pub fn register<F>(&mut self, method: MethodType, constructor: F) -> Option<Constructor>
    where
        F: Fn() -> Box<dyn Payload> + Send + Sync + 'static,
    {
        self.constructors.insert(method, Arc::new(constructor))
    }

    pub fn construct(&self, method: MethodType) -> Option<Box<dyn Payload>> {
        self.constructors.get(&method).map(|constructor| constructor())
    }

    pub fn contains(&self, method: MethodType) -> bool {
        self.constructors.contains_key(&method)
    }

    pub fn method_types(&self) -> Vec<MethodType> {
        self.constructors.keys().copied().collect()
    }

    /// Pick the first method of `preferences` that is registered, not yet
    /// tried and, when the peer sent a Nak, among the methods it asked for.
    pub fn negotiate(
        &self,
        preferences: &[MethodType],
        tried: &[MethodType],
        desired: Option<&[MethodType]>,
    ) -> Option<MethodType> {
        preferences.iter().copied().find(|method| {
            self.contains(*method)
                && !tried.contains(method)
                && desired.is_none_or(|desired| desired.contains(method))
        })
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.method_types())
            .finish()
    }
}
