//! Registry of user-declared cross-fragment variables.
//!
//! Fragments refer to two flavors of special variables, both declared as
//! static fields on the instrumentation class and redirected by the weaver:
//! *synthetic locals* become method-scoped local variables, *thread locals*
//! become per-thread variable slots. The [`VariableCatalog`] indexes both by
//! fully qualified field name; it is built once at configuration time and
//! read-only afterwards.

use std::{collections::HashMap, sync::Arc};

use crate::method::{Insn, TypeDesc};

/// Delimiter between owner type and field name in a fully qualified name.
const NAME_DELIM: char = '.';

/// Returns the fully qualified field name for an owner type and field name,
/// the identity under which special variables are registered and looked up.
#[must_use]
pub fn fq_field_name(owner: &str, field: &str) -> String {
    format!("{owner}{NAME_DELIM}{field}")
}

/// Initialization policy of a synthetic local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticLocalInit {
    /// Initialize the variable at every method entry.
    #[default]
    Always,
    /// Never initialize; the first fragment to write it is responsible.
    Never,
    /// Initialize only where the weaver cannot prove a dominating write.
    BestEffort,
}

/// A method-scoped cross-fragment variable.
///
/// Identity is owner type plus field name; two declarations with the same
/// identity are the same variable.
#[derive(Debug, Clone)]
pub struct SyntheticLocalVar {
    /// Internal name of the declaring instrumentation class.
    pub owner: String,
    /// Field name.
    pub name: String,
    /// Declared variable type.
    pub type_desc: TypeDesc,
    /// Initialization policy.
    pub initialize: SyntheticLocalInit,
    /// Optional initialization code emitted at method entry.
    pub init_code: Option<Vec<Insn>>,
}

impl SyntheticLocalVar {
    /// Returns the fully qualified field name identifying this variable.
    #[must_use]
    pub fn id(&self) -> String {
        fq_field_name(&self.owner, &self.name)
    }
}

impl PartialEq for SyntheticLocalVar {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl Eq for SyntheticLocalVar {}

impl std::hash::Hash for SyntheticLocalVar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.name.hash(state);
    }
}

/// A thread-scoped cross-fragment variable.
#[derive(Debug, Clone)]
pub struct ThreadLocalVar {
    /// Internal name of the declaring instrumentation class.
    pub owner: String,
    /// Field name.
    pub name: String,
    /// Declared variable type.
    pub type_desc: TypeDesc,
    /// Whether child threads inherit the parent thread's value.
    pub inheritable: bool,
}

impl ThreadLocalVar {
    /// Returns the fully qualified field name identifying this variable.
    #[must_use]
    pub fn id(&self) -> String {
        fq_field_name(&self.owner, &self.name)
    }
}

impl PartialEq for ThreadLocalVar {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl Eq for ThreadLocalVar {}

impl std::hash::Hash for ThreadLocalVar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.name.hash(state);
    }
}

/// Registry of declared special variables, keyed by fully qualified field
/// name.
#[derive(Debug, Default)]
pub struct VariableCatalog {
    synthetic: HashMap<String, Arc<SyntheticLocalVar>>,
    thread: HashMap<String, Arc<ThreadLocalVar>>,
}

impl VariableCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synthetic local variable under its identity.
    pub fn put_synthetic(&mut self, var: SyntheticLocalVar) {
        self.synthetic.insert(var.id(), Arc::new(var));
    }

    /// Registers a thread local variable under its identity.
    pub fn put_thread(&mut self, var: ThreadLocalVar) {
        self.thread.insert(var.id(), Arc::new(var));
    }

    /// Returns the synthetic locals map, keyed by fully qualified field name.
    #[must_use]
    pub fn synthetic_locals(&self) -> &HashMap<String, Arc<SyntheticLocalVar>> {
        &self.synthetic
    }

    /// Returns the thread locals map, keyed by fully qualified field name.
    #[must_use]
    pub fn thread_locals(&self) -> &HashMap<String, Arc<ThreadLocalVar>> {
        &self.thread
    }

    /// Absorbs all entries of another catalog.
    pub fn merge(&mut self, other: VariableCatalog) {
        self.synthetic.extend(other.synthetic);
        self.thread.extend(other.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_owner_plus_name() {
        let var = ThreadLocalVar {
            owner: "my/Instrumentation".to_string(),
            name: "counter".to_string(),
            type_desc: TypeDesc::Long,
            inheritable: false,
        };
        assert_eq!(var.id(), "my/Instrumentation.counter");
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = VariableCatalog::new();
        catalog.put_synthetic(SyntheticLocalVar {
            owner: "Inst".to_string(),
            name: "flag".to_string(),
            type_desc: TypeDesc::Boolean,
            initialize: SyntheticLocalInit::Always,
            init_code: None,
        });

        assert!(catalog.synthetic_locals().contains_key("Inst.flag"));
        assert!(catalog.thread_locals().is_empty());
    }
}
