use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::env::var::Var;

/// A namespace: interned vars, aliases to other namespaces, and
/// referred vars imported from elsewhere.
#[derive(Debug)]
pub struct Namespace {
    pub name: Rc<str>,
    interns: RefCell<HashMap<Rc<str>, Rc<Var>>>,
    aliases: RefCell<HashMap<Rc<str>, Rc<Namespace>>>,
    refers: RefCell<HashMap<Rc<str>, Rc<Var>>>,
}

impl Namespace {
    pub fn new(name: &str) -> Namespace {
        Namespace {
            name: Rc::from(name),
            interns: RefCell::new(HashMap::new()),
            aliases: RefCell::new(HashMap::new()),
            refers: RefCell::new(HashMap::new()),
        }
    }

    /// The var named `name`, interning an unbound one on first use.
    pub fn intern(&self, name: &str) -> Rc<Var> {
        if let Some(existing) = self.interns.borrow().get(name) {
            return Rc::clone(existing);
        }
        let var = Rc::new(Var::unbound(&self.name, name));
        self.interns
            .borrow_mut()
            .insert(Rc::from(name), Rc::clone(&var));
        var
    }

    /// Own interns first, then refers.
    pub fn resolve(&self, name: &str) -> Option<Rc<Var>> {
        if let Some(var) = self.interns.borrow().get(name) {
            return Some(Rc::clone(var));
        }
        self.refers.borrow().get(name).map(Rc::clone)
    }

    /// Resolves `alias/name` through the alias table.
    pub fn resolve_qualified(&self, alias: &str, name: &str) -> Option<Rc<Var>> {
        self.aliases
            .borrow()
            .get(alias)
            .and_then(|target| target.resolve(name))
    }

    pub fn refer(&self, name: &str, var: Rc<Var>) {
        self.refers.borrow_mut().insert(Rc::from(name), var);
    }

    pub fn set_alias(&self, alias: &str, target: Rc<Namespace>) {
        self.aliases.borrow_mut().insert(Rc::from(alias), target);
    }

    /// Snapshot of the interned vars, for bootstrap serialization
    /// and GC root walks.
    pub fn interned_vars(&self) -> Vec<Rc<Var>> {
        self.interns.borrow().values().map(Rc::clone).collect()
    }

    pub fn referred(&self) -> Vec<(Rc<str>, Rc<Var>)> {
        self.refers
            .borrow()
            .iter()
            .map(|(name, var)| (Rc::clone(name), Rc::clone(var)))
            .collect()
    }

    pub fn alias_names(&self) -> Vec<(Rc<str>, Rc<str>)> {
        self.aliases
            .borrow()
            .iter()
            .map(|(alias, ns)| (Rc::clone(alias), Rc::clone(&ns.name)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::value::Value;

    #[test]
    fn intern_is_idempotent() {
        let ns = Namespace::new("user");
        let a = ns.intern("x");
        let b = ns.intern("x");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn resolution_order() {
        let ns = Namespace::new("user");
        let other = Namespace::new("geom");
        let referred = other.intern("area");
        referred.bind_root(Value::Int(1));
        ns.refer("area", Rc::clone(&referred));

        // refer is visible...
        assert!(Rc::ptr_eq(&ns.resolve("area").unwrap(), &referred));
        // ...until an intern shadows it
        let own = ns.intern("area");
        assert!(Rc::ptr_eq(&ns.resolve("area").unwrap(), &own));
    }

    #[test]
    fn qualified_resolution_goes_through_aliases() {
        let ns = Namespace::new("user");
        let geom = Rc::new(Namespace::new("geom"));
        let area = geom.intern("area");
        ns.set_alias("g", Rc::clone(&geom));

        assert!(Rc::ptr_eq(&ns.resolve_qualified("g", "area").unwrap(), &area));
        assert!(ns.resolve_qualified("h", "area").is_none());
    }
}
