// correspond.rs — Symbol correspondence tables
//
// Maps every logical symbol usable in one entity's equations to its C++
// access expression. Neurons index per-element storage with `i`; synapses
// store a dense pre × post matrix indexed `[i][j]`, reach presynaptic
// per-element attributes with `i` and postsynaptic ones with `j`.
//
// Preconditions: attribute lists are final.
// Postconditions: one entry per attribute, random draw and built-in symbol.
// Failure modes: none (lookups return `Option`).
// Side effects: none.

use std::collections::BTreeMap;

use crate::attribute::Attribute;
use crate::capture::RandomVariableSpec;

/// Per-class symbol table. Never shared across entity types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondence {
    table: BTreeMap<String, String>,
}

impl Correspondence {
    pub fn neuron(attributes: &[Attribute], randoms: &[RandomVariableSpec]) -> Self {
        let mut c = Correspondence::with_builtins();
        for attr in attributes {
            c.insert(&attr.name, field("this", attr, "[i]"));
        }
        for r in randoms {
            c.insert(&r.name, format!("this->{}[i]", r.name));
        }
        c
    }

    pub fn synapse(
        attributes: &[Attribute],
        randoms: &[RandomVariableSpec],
        pre: &[Attribute],
        post: &[Attribute],
    ) -> Self {
        let mut c = Correspondence::with_builtins();
        for attr in attributes {
            c.insert(&attr.name, field("this", attr, "[i][j]"));
        }
        for attr in pre {
            c.insert(&format!("pre.{}", attr.name), field("this->pre", attr, "[i]"));
        }
        for attr in post {
            c.insert(&format!("post.{}", attr.name), field("this->post", attr, "[j]"));
        }
        for r in randoms {
            c.insert(&r.name, format!("this->{}[i][j]", r.name));
        }
        c
    }

    fn with_builtins() -> Self {
        let mut c = Correspondence::default();
        c.insert("t", "this->net->t".to_string());
        c.insert("dt", "this->net->dt".to_string());
        c
    }

    fn insert(&mut self, symbol: &str, access: String) {
        self.table.insert(symbol.to_string(), access);
    }

    /// Register a loop-local temporary, accessed by its own name.
    pub fn add_local(&mut self, name: &str) {
        self.insert(name, name.to_string());
    }

    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        self.table.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn field(owner: &str, attr: &Attribute, index: &str) -> String {
    if attr.is_shared() {
        format!("{owner}->{}", attr.name)
    } else {
        format!("{owner}->{}{index}", attr.name)
    }
}
