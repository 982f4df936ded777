use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use crate::object::Object;

/// One frame of bindings. Frames are shared behind `Rc<RefCell<_>>` so a
/// closure can keep its defining frame alive after the call that made it.
#[derive(Debug, Default)]
pub struct Environment {
    store: HashMap<String, Object>,
    outer: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment { store: HashMap::new(), outer: None }
    }

    pub fn new_enclosed(outer: Rc<RefCell<Environment>>) -> Self {
        Environment { store: HashMap::new(), outer: Some(outer) }
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        match self.store.get(key) {
            Some(obj) => Some(obj.clone()),
            None => match &self.outer {
                Some(env) => env.borrow().get(key),
                None => None,
            },
        }
    }

    /// Binds in this frame only; an outer binding of the same name is
    /// shadowed, never touched.
    pub fn set(&mut self, key: String, value: Object) {
        self.store.insert(key, value);
    }
}
