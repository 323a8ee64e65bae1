//! Conversation-starter insights for a school.

pub mod result;
pub mod service;

pub use result::{
    extract_json_object, parse_generation, ConversationStarter, GenerationResult, SalesPriority,
};
pub use service::{InsightService, PriorityCounts, PrioritySource, RankedSchool, ServiceStatistics};
