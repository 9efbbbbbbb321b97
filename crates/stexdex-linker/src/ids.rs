//! Integer ids and the URI interner private to one linker

use std::collections::HashMap;
use std::sync::Arc;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                $name(index as u32)
            }

            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// A file of the linked snapshot.
    FileId
);
define_id!(
    /// One module declaration. Several declarations may share a URI.
    ModuleId
);
define_id!(
    /// One symbol declaration.
    SymbolId
);
define_id!(VerbId);
define_id!(
    /// An interned URI.
    UriId
);

/// Bidirectional string <-> [`UriId`] table.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    ids: HashMap<Arc<str>, UriId>,
    strings: Vec<Arc<str>>,
}

impl Interner {
    pub fn intern(&mut self, s: &str) -> UriId {
        if let Some(id) = self.ids.get(s) {
            return *id;
        }
        let id = UriId::new(self.strings.len());
        let shared: Arc<str> = Arc::from(s);
        self.strings.push(shared.clone());
        self.ids.insert(shared, id);
        id
    }

    pub fn get(&self, s: &str) -> Option<UriId> {
        self.ids.get(s).copied()
    }

    pub fn resolve(&self, id: UriId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }
}
