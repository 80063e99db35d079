use radius_proto::MethodType;
use std::any::Any;
use std::collections::HashMap;

/// Per-method state cells of one conversation level
///
/// Each method owns the cell under its own type; the contents are opaque to
/// everything else.
#[derive(Default)]
pub struct ProtocolStateStore {
    cells: HashMap<MethodType, Box<dyn Any + Send>>,
}

impl ProtocolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, id: MethodType) -> Option<&mut (dyn Any + Send + 'static)> {
        self.cells.get_mut(&id).map(|cell| cell.as_mut())
    }

    pub fn set(&mut self, id: MethodType, state: Box<dyn Any + Send>) {
        self.cells.insert(id, state);
    }

    pub fn contains(&self, id: MethodType) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn remove(&mut self, id: MethodType) -> Option<Box<dyn Any + Send>> {
        self.cells.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl std::fmt::Debug for ProtocolStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.cells.keys()).finish()
    }
}
