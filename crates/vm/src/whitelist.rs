//! The white-list of classes reachable from contract code.
//!
//! Every external reference of an uploaded module must resolve inside its
//! classpath or land on a white-listed class. The default list names the
//! base runtime classes; networks may extend it through consensus.

use arca_types::{lang, ClassType};
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
pub struct WhiteList {
    classes: BTreeSet<String>,
}

impl Default for WhiteList {
    fn default() -> Self {
        let classes = [
            lang::STORAGE,
            lang::CONTRACT,
            lang::EXTERNALLY_OWNED_ACCOUNT,
            lang::GAMETE,
            lang::EVENT,
            lang::EXCEPTION,
            lang::RUNTIME_EXCEPTION,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self { classes }
    }
}

impl WhiteList {
    pub fn with(mut self, class: &ClassType) -> Self {
        self.classes.insert(class.0.clone());
        self
    }

    pub fn allows_class(&self, class: &ClassType) -> bool {
        self.classes.contains(class.name())
    }

    /// Field accesses and calls are currently allowed exactly on
    /// white-listed classes; a finer per-member list would slot in here.
    pub fn allows_field(&self, class: &ClassType, _name: &str) -> bool {
        self.allows_class(class)
    }

    pub fn allows_method(&self, class: &ClassType, _name: &str) -> bool {
        self.allows_class(class)
    }
}
