//! 记忆层：交互历史、会话上下文、挂起栈与持久化

pub mod context;
pub mod interaction;
pub mod persistence;
pub mod store;

pub use context::{
    keys, PendingIntent, ResumedTask, SessionContext, SuspendedIntent, SuspensionStack,
    ToolOutputRecord,
};
pub use interaction::{Interaction, InteractionKind, InteractionLog, InteractionMetadata, Role};
pub use persistence::{StoreDocument, StorePersistence};
pub use store::SessionStore;
