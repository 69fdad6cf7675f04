//! Action subsystem: from phase-tagged activations to invoked behavior
//!
//! ```text
//! ActionRegistry ─┐
//!                 ├─► SchemeBook::build ──► ResolvedScheme ──► dispatch ──► TriggeredActionEvent
//! DefinitionConfig┘   (validated once)      (per user)         (per cycle)
//! ```

pub mod registry;
pub mod resolver;
pub mod scheme;

pub use registry::{ActionError, ActionHandler, ActionRegistry, RegisteredAction};
pub use resolver::{dispatch, resolve, ActivationContext, TriggeredActionEvent};
pub use scheme::{
    ActiveInputScheme, DefinitionConfig, InputActionMap, ResolvedBinding, ResolvedScheme,
    SchemeBook, SchemeConfig,
};
