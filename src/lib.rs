pub mod algorithms;
pub mod copy;
pub mod error;
pub mod find_replace;
pub mod flatten;
pub mod id;
pub mod invariants;
pub mod models;
pub mod mutations;
pub mod operations;
pub mod patch;
pub mod permissions;
pub mod sanitize;
pub mod store;
pub mod validate;

pub mod prelude {
    pub use crate::copy::{Copied, CopyOptions, copy_subtree};
    pub use crate::error::{EngineError, ErrorKind, Result};
    pub use crate::find_replace::{FindReplaceOutcome, TextMatch, find_and_replace, find_in_flow};
    pub use crate::flatten::{FlowResolver, flatten};
    pub use crate::models::{
        Flow, FlowId, Graph, Node, NodeId, NodeKind, ROOT_NODE_ID, UserId,
    };
    pub use crate::mutations::{MutationOutcome, add_node, connect, paste, remove, update_node};
    pub use crate::operations::{FlowOperation, FlowOperationResult, FlowOperations};
    pub use crate::patch::PatchOp;
    pub use crate::permissions::{AccessPolicy, AllowAll};
    pub use crate::sanitize::sanitize;
    pub use crate::store::{FlattenCache, FlowStore, InMemoryFlowStore};
    pub use crate::validate::{
        CheckRegistry, CheckStatus, FlowDiagnosis, ValidationCheck, validate_and_diff_flow,
    };
}
