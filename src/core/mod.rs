//! Routing, lifecycle and completion engine.

pub mod catalog;
pub mod completion;
pub mod engine;
pub mod gateway;
pub mod health;
pub mod http;
pub mod local;
pub mod logging;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod router;
pub mod semantic;
pub mod usage;
pub mod window;

pub use catalog::{CloudSource, ModelCatalog};
pub use completion::{CompletionClient, CompletionResponse, ImageAttachment, TokenUsage};
pub use engine::{Engine, EngineOptions, EngineStatus};
pub use gateway::{CloudTierGateway, GatewaySettings, SecondaryProvider};
pub use health::{HealthProbes, HealthReport};
pub use local::{ActiveModelInfo, LocalModelManager, LocalSettings};
pub use memory::{MemoryProbe, SystemMemory};
pub use models::{
    Backend, CloudProvider, Message, ModelDescriptor, ModelKind, ModelStatus, Role, Route, Tier,
    TierState,
};
pub use orchestrator::{
    CompletionOrchestrator, CompletionOutcome, CompletionRequest, MAX_ATTEMPTS, RecoveryAttempt,
    RecoveryStage,
};
pub use router::{ModelRouter, RouteRequest};
pub use semantic::{SemanticErrorKind, SemanticTable};
pub use usage::{MemoryLedger, TracingLedger, UsageLedger, UsageRecord};
pub use window::{ConversationWindow, WindowLimits};
