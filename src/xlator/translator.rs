//! A single graph node and the loaded graph (C4).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dict::Dict;
use crate::error::GlusterError;
use crate::fops::Xlator;
use crate::inode::TranslatorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    /// Constructed and option-validated, `init` not yet run.
    Uninitialized,
    /// `init` returned `Ok`; `fini` must be called during teardown.
    Initialized,
    /// `init` failed; this node never ran and must never run `fini`.
    InitFailed,
    FiniDone,
}

/// One node in the loaded translator graph.
pub struct Translator {
    pub id: TranslatorId,
    pub name: String,
    pub type_name: String,
    pub options: Dict,
    pub children: Vec<Arc<Translator>>,
    parents: Mutex<Vec<Weak<Translator>>>,
    pub(crate) imp: Arc<dyn Xlator>,
    state: Mutex<TranslatorState>,
}

impl Translator {
    pub fn new(id: TranslatorId, name: impl Into<String>, type_name: impl Into<String>, options: Dict, imp: Arc<dyn Xlator>) -> Arc<Translator> {
        Arc::new(Translator {
            id,
            name: name.into(),
            type_name: type_name.into(),
            options,
            children: Vec::new(),
            parents: Mutex::new(Vec::new()),
            imp,
            state: Mutex::new(TranslatorState::Uninitialized),
        })
    }

    pub fn with_children(mut self_arc: Arc<Translator>, children: Vec<Arc<Translator>>) -> Arc<Translator> {
        // `Arc::get_mut` only succeeds before any clone has escaped, which
        // holds here: the graph builder constructs bottom-up and wires
        // parent links immediately after, below.
        {
            let this = Arc::get_mut(&mut self_arc).expect("translator must be uniquely owned while the graph is being assembled");
            this.children = children;
        }
        for child in &self_arc.children {
            child.parents.lock().push(Arc::downgrade(&self_arc));
        }
        self_arc
    }

    pub fn first_child(&self) -> Option<Arc<Translator>> {
        self.children.first().cloned()
    }

    pub fn parents(&self) -> Vec<Arc<Translator>> {
        self.parents.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn state(&self) -> TranslatorState {
        *self.state.lock()
    }

    pub fn imp(&self) -> &Arc<dyn Xlator> {
        &self.imp
    }
}

/// The assembled translator graph: every node reachable from `top`, plus the
/// order nodes were constructed in (leaves-to-root, the order `xlator_init`
/// walks and `xlator_tree_fini` walks in reverse).
pub struct Graph {
    pub top: Arc<Translator>,
    /// Construction order, leaves first. `xlator_init` walks this forward;
    /// `xlator_tree_fini` walks it backward, limited to nodes whose `init`
    /// succeeded.
    pub nodes: Vec<Arc<Translator>>,
    pub uuid: Uuid,
}

impl Graph {
    pub fn new(top: Arc<Translator>, nodes: Vec<Arc<Translator>>) -> Self {
        Graph {
            top,
            nodes,
            uuid: Uuid::new_v4(),
        }
    }

    /// `xlator_init`: run every node's `init` hook in construction
    /// (depth-first, leaves-first) order. On the first failure, every node
    /// already initialized is rolled back via `fini`, in reverse order, and
    /// the error is returned — the graph never ends up partially live.
    pub fn init(&self) -> Result<(), GlusterError> {
        for node in &self.nodes {
            match node.imp.init(&node.options) {
                Ok(()) => *node.state.lock() = TranslatorState::Initialized,
                Err(e) => {
                    *node.state.lock() = TranslatorState::InitFailed;
                    self.tree_fini();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// `xlator_tree_fini`: call `fini` on every node whose `init` succeeded,
    /// in the reverse of initialization order, and mark it torn down.
    /// Safe to call after a partial [`Graph::init`] failure or during normal
    /// shutdown.
    pub fn tree_fini(&self) {
        for node in self.nodes.iter().rev() {
            let mut state = node.state.lock();
            if *state == TranslatorState::Initialized {
                node.imp.fini();
                *state = TranslatorState::FiniDone;
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<Translator>> {
        self.nodes.iter().find(|n| n.name == name).cloned()
    }
}
