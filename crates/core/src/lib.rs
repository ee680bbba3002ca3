pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use catalog::MenuCatalog;
pub use domain::cart::{Cart, CartLine, PurchaseInformation, SelectedOption};
pub use domain::conversation::{ConversationState, PendingApproval};
pub use domain::menu::{MenuItem, MenuItemId, MenuOption, MenuOptionId};
pub use domain::message::{Message, ToolCall};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{Edge, FlowEngine, OrderingGraph, RouteDecision, Step, ToolName};
